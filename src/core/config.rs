//! Layered configuration: defaults, then the TOML file, then environment.
//!
//! CLI flags are applied last by the caller.

use crate::core::directory::UnbindCredentials;
use crate::core::error::ConvertError;
use crate::core::poll::PollPolicy;
use crate::core::record::DEFAULT_STAFF_GID;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/Library/Application Support/mobileconv/config.toml";
pub const DEFAULT_BACKUP_ROOT: &str = "/Library/Application Support/mobileconv/backups";

pub const ENV_ADMIN_POLICY: &str = "MOBILECONV_ADMIN_POLICY";
pub const ENV_BACKUP_ROOT: &str = "MOBILECONV_BACKUP_ROOT";
pub const ENV_UNBIND_USER: &str = "MOBILECONV_UNBIND_USER";
pub const ENV_UNBIND_PASSWORD: &str = "MOBILECONV_UNBIND_PASSWORD";

/// What happens to `admin` membership of a converted account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AdminPolicy {
    /// Remove every converted account from admin.
    Demote,
    /// Leave admin membership as it was before conversion.
    #[default]
    Preserve,
    /// Remove from admin only accounts that were AD-bound.
    DemoteIfAd,
}

impl AdminPolicy {
    pub fn demotes(self, ad_bound: bool) -> bool {
        match self {
            AdminPolicy::Demote => true,
            AdminPolicy::Preserve => false,
            AdminPolicy::DemoteIfAd => ad_bound,
        }
    }

    /// Snapshot marker recording prior admin membership.
    pub fn marker_name(self, ad_bound: bool) -> &'static str {
        if self.demotes(ad_bound) {
            "admin.remove"
        } else {
            "admin.preserve"
        }
    }
}

impl fmt::Display for AdminPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdminPolicy::Demote => "demote",
            AdminPolicy::Preserve => "preserve",
            AdminPolicy::DemoteIfAd => "demote-if-ad",
        };
        f.write_str(s)
    }
}

impl FromStr for AdminPolicy {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demote" => Ok(AdminPolicy::Demote),
            "preserve" => Ok(AdminPolicy::Preserve),
            "demote-if-ad" | "demote_if_ad" => Ok(AdminPolicy::DemoteIfAd),
            other => Err(ConvertError::ValidationError(format!(
                "unknown admin policy '{}' (expected demote, preserve or demote-if-ad)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl DaemonConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnbindConfig {
    pub user: Option<String>,
    /// Environment only; never read from or written to the file.
    #[serde(skip)]
    pub password: Option<String>,
}

impl UnbindConfig {
    /// Credentials for `dsconfigad -remove`. A user without a password is
    /// not usable, so the placeholders are used and the gap is logged.
    pub fn credentials(&self) -> UnbindCredentials {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => UnbindCredentials {
                user: user.clone(),
                password: password.clone(),
            },
            (Some(user), None) => {
                tracing::warn!(
                    user = %user,
                    "unbind user configured but {} is not set; using placeholder credentials",
                    ENV_UNBIND_PASSWORD
                );
                UnbindCredentials::placeholder()
            }
            _ => UnbindCredentials::placeholder(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub admin_policy: AdminPolicy,
    pub backup_root: PathBuf,
    /// Lowest UID considered by `convert --all`.
    pub min_uid: u32,
    pub staff_gid: u32,
    pub daemon: DaemonConfig,
    pub unbind: UnbindConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_policy: AdminPolicy::default(),
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            min_uid: 501,
            staff_gid: DEFAULT_STAFF_GID,
            daemon: DaemonConfig::default(),
            unbind: UnbindConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`. An
    /// explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConvertError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConvertError> {
        let content = fs::read_to_string(path).map_err(|e| ConvertError::ConfigError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConvertError::ConfigError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConvertError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ADMIN_POLICY).filter(|v| !v.trim().is_empty()) {
            self.admin_policy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_BACKUP_ROOT).filter(|v| !v.trim().is_empty()) {
            self.backup_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup(ENV_UNBIND_USER).filter(|v| !v.trim().is_empty()) {
            self.unbind.user = Some(raw);
        }
        if let Some(raw) = lookup(ENV_UNBIND_PASSWORD).filter(|v| !v.is_empty()) {
            self.unbind.password = Some(raw);
        }
        Ok(())
    }
}
