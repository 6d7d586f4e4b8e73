//! Backup store for pre-conversion permission snapshots.
//!
//! One directory per username under the backup root:
//! - `groups.txt`: sorted group names, one per line
//! - `admin.remove` / `admin.preserve`: present when the user was an admin
//! - `home-acl.txt`: `ls -le` listing of the home folder, when it existed
//! - `snapshot.json`: manifest with digest and lifecycle state
//!
//! Every file is synced to disk before `save` returns.

use crate::core::error::ConvertError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const GROUPS_FILE: &str = "groups.txt";
pub const HOME_ACL_FILE: &str = "home-acl.txt";
pub const MANIFEST_FILE: &str = "snapshot.json";
pub const ADMIN_MARKERS: &[&str] = &["admin.remove", "admin.preserve"];

/// Group and admin state captured before any destructive change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSnapshot {
    pub username: String,
    /// Sorted and de-duplicated.
    pub groups: Vec<String>,
    pub had_admin: bool,
    pub home_acl: Option<String>,
}

impl PermissionSnapshot {
    pub fn new<I, S>(username: &str, groups: I, had_admin: bool, home_acl: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups: BTreeSet<String> = groups
            .into_iter()
            .map(Into::into)
            .filter(|g: &String| !g.trim().is_empty())
            .collect();
        Self {
            username: username.to_string(),
            groups: groups.into_iter().collect(),
            had_admin,
            home_acl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    /// Written, conversion not finished. Reused by a retry.
    Pending,
    /// Reconciliation finished. A later conversion may overwrite it.
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub username: String,
    pub run_id: String,
    pub ts: String,
    pub groups_sha256: String,
    pub admin_marker: Option<String>,
    pub state: SnapshotState,
}

/// Filesystem store keyed by username.
#[derive(Debug, Clone)]
pub struct BackupStore {
    /// Absolute path to the backup root directory
    pub root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, username: &str) -> Result<PathBuf, ConvertError> {
        validate_username(username)?;
        Ok(self.root.join(username))
    }

    pub fn save(
        &self,
        snapshot: &PermissionSnapshot,
        admin_marker: &str,
        run_id: &str,
    ) -> Result<SnapshotManifest, ConvertError> {
        if !ADMIN_MARKERS.contains(&admin_marker) {
            return Err(ConvertError::ValidationError(format!(
                "unknown admin marker '{}'",
                admin_marker
            )));
        }
        let dir = self.user_dir(&snapshot.username)?;
        fs::create_dir_all(&dir)?;

        let groups_body = render_groups(&snapshot.groups);
        write_durable(&dir.join(GROUPS_FILE), groups_body.as_bytes())?;

        for marker in ADMIN_MARKERS {
            remove_if_exists(&dir.join(marker))?;
        }
        let marker = if snapshot.had_admin {
            write_durable(&dir.join(admin_marker), b"")?;
            Some(admin_marker.to_string())
        } else {
            None
        };

        match &snapshot.home_acl {
            Some(listing) => write_durable(&dir.join(HOME_ACL_FILE), listing.as_bytes())?,
            None => remove_if_exists(&dir.join(HOME_ACL_FILE))?,
        }

        let manifest = SnapshotManifest {
            username: snapshot.username.clone(),
            run_id: run_id.to_string(),
            ts: time::now_epoch_z(),
            groups_sha256: sha256_hex(groups_body.as_bytes()),
            admin_marker: marker,
            state: SnapshotState::Pending,
        };
        self.write_manifest(&dir, &manifest)?;
        sync_dir(&dir);
        Ok(manifest)
    }

    pub fn manifest(&self, username: &str) -> Result<Option<SnapshotManifest>, ConvertError> {
        let path = self.user_dir(username)?.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Load and verify a snapshot against its manifest digest.
    pub fn load(
        &self,
        username: &str,
    ) -> Result<Option<(PermissionSnapshot, SnapshotManifest)>, ConvertError> {
        let Some(manifest) = self.manifest(username)? else {
            return Ok(None);
        };
        let dir = self.user_dir(username)?;
        let groups_body = fs::read_to_string(dir.join(GROUPS_FILE))?;
        let digest = sha256_hex(groups_body.as_bytes());
        if digest != manifest.groups_sha256 {
            return Err(ConvertError::ValidationError(format!(
                "snapshot for '{}' does not match its manifest digest",
                username
            )));
        }

        let had_admin = ADMIN_MARKERS.iter().any(|m| dir.join(m).exists());
        let acl_path = dir.join(HOME_ACL_FILE);
        let home_acl = if acl_path.exists() {
            Some(fs::read_to_string(acl_path)?)
        } else {
            None
        };
        let snapshot = PermissionSnapshot::new(
            username,
            groups_body.lines().map(str::to_string),
            had_admin,
            home_acl,
        );
        Ok(Some((snapshot, manifest)))
    }

    pub fn mark_applied(&self, username: &str) -> Result<(), ConvertError> {
        let dir = self.user_dir(username)?;
        let Some(mut manifest) = self.manifest(username)? else {
            return Err(ConvertError::ValidationError(format!(
                "no snapshot recorded for '{}'",
                username
            )));
        };
        manifest.state = SnapshotState::Applied;
        self.write_manifest(&dir, &manifest)
    }

    fn write_manifest(&self, dir: &Path, manifest: &SnapshotManifest) -> Result<(), ConvertError> {
        let body = serde_json::to_string_pretty(manifest)?;
        write_durable(&dir.join(MANIFEST_FILE), body.as_bytes())
    }
}

fn validate_username(username: &str) -> Result<(), ConvertError> {
    if username.is_empty()
        || username == "."
        || username == ".."
        || username.contains('/')
        || username.contains('\0')
    {
        return Err(ConvertError::ValidationError(format!(
            "invalid username '{}'",
            username
        )));
    }
    Ok(())
}

fn render_groups(groups: &[String]) -> String {
    let mut body = String::new();
    for g in groups {
        body.push_str(g);
        body.push('\n');
    }
    body
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_durable(path: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), ConvertError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// Directory fsync is best effort; not every filesystem supports it.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
