//! Per-invocation conversion context and the per-user stage machine.

use crate::core::audit::AuditLog;
use crate::core::config::{AdminPolicy, Config};
use crate::core::directory::Host;
use crate::core::error::ConvertError;
use crate::core::poll::PollPolicy;
use crate::core::store::BackupStore;
use serde::Serialize;
use std::fmt;

/// Everything the phases need, passed explicitly instead of read from
/// process-wide state.
#[derive(Clone, Copy)]
pub struct ConversionContext<'a> {
    pub host: Host<'a>,
    pub store: &'a BackupStore,
    pub audit: &'a AuditLog,
    pub policy: AdminPolicy,
    pub staff_gid: u32,
    pub daemon_poll: PollPolicy,
}

impl<'a> ConversionContext<'a> {
    pub fn new(
        host: Host<'a>,
        store: &'a BackupStore,
        audit: &'a AuditLog,
        config: &Config,
    ) -> Self {
        Self {
            host,
            store,
            audit,
            policy: config.admin_policy,
            staff_gid: config.staff_gid,
            daemon_poll: config.daemon.poll_policy(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Unclassified,
    Local,
    AdBound,
    Snapshotted,
    Stripped,
    DaemonRestarted,
    Reconciled,
    AdminPolicyApplied,
    Terminal,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Unclassified => "unclassified",
            Stage::Local => "local",
            Stage::AdBound => "ad-bound",
            Stage::Snapshotted => "snapshotted",
            Stage::Stripped => "stripped",
            Stage::DaemonRestarted => "daemon-restarted",
            Stage::Reconciled => "reconciled",
            Stage::AdminPolicyApplied => "admin-policy-applied",
            Stage::Terminal => "terminal",
        }
    }

    /// Allowed forward transitions. Nothing may be skipped.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Unclassified, Local)
                | (Unclassified, AdBound)
                | (Local, AdminPolicyApplied)
                | (Local, Terminal)
                | (AdBound, Snapshotted)
                | (Snapshotted, Stripped)
                | (Stripped, DaemonRestarted)
                | (DaemonRestarted, Reconciled)
                | (Reconciled, AdminPolicyApplied)
                | (AdminPolicyApplied, Terminal)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one user's stage and writes each transition to the audit log.
pub struct StageTracker<'a> {
    audit: &'a AuditLog,
    user: String,
    stage: Stage,
}

impl<'a> StageTracker<'a> {
    pub fn new(audit: &'a AuditLog, user: &str) -> Self {
        Self {
            audit,
            user: user.to_string(),
            stage: Stage::Unclassified,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), ConvertError> {
        if !self.stage.can_advance_to(next) {
            return Err(ConvertError::ValidationError(format!(
                "illegal stage transition for '{}': {} -> {}",
                self.user, self.stage, next
            )));
        }
        tracing::info!(user = %self.user, from = %self.stage, to = %next, "stage transition");
        self.audit.record(&self.user, next.as_str(), "ok", None)?;
        self.stage = next;
        Ok(())
    }

    /// Record that the current stage could not be left. The audit write is
    /// best effort so the original error is what surfaces.
    pub fn fail(&self, err: &ConvertError) {
        tracing::error!(user = %self.user, stage = %self.stage, error = %err, "conversion failed");
        if let Err(audit_err) =
            self.audit
                .record(&self.user, self.stage.as_str(), "failed", Some(&err.to_string()))
        {
            tracing::warn!(error = %audit_err, "could not append failure to audit log");
        }
    }
}
