use crate::core::error::ConvertError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AUDIT_LOG_FILE: &str = "conversion.events.jsonl";

/// Append-only record of conversion stage transitions, shared by all users
/// under one backup root.
pub struct AuditLog {
    path: PathBuf,
    run_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub ts: String,
    pub event_id: String,
    pub run_id: String,
    pub user: String,
    pub stage: String,
    pub status: String,
    pub detail: Option<String>,
}

impl AuditLog {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(AUDIT_LOG_FILE),
            run_id: time::new_event_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        user: &str,
        stage: &str,
        status: &str,
        detail: Option<&str>,
    ) -> Result<(), ConvertError> {
        let ev = AuditEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            run_id: self.run_id.clone(),
            user: user.to_string(),
            stage: stage.to_string(),
            status: status.to_string(),
            detail: detail.map(|s| s.to_string()),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    /// Events in file order; unparsable lines are skipped.
    pub fn read_events(&self) -> Result<Vec<AuditEvent>, ConvertError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
