use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Config error in {path}: {message}")]
    ConfigError { path: PathBuf, message: String },
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Directory service unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Command `{command}` failed (exit {code}): {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    DaemonTimeout { what: String, waited_ms: u64 },
    #[error("Failed to remove {user} from admin: {reason}")]
    AdminDemotionFailed { user: String, reason: String },
    #[error("Active Directory unbind failed: {0}")]
    UnbindFailed(String),
    #[error("Missing local credential: {0}")]
    MissingCredential(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConvertError {
    /// Environment failures stop a batch outright; everything else is
    /// charged to the user being converted.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            ConvertError::DirectoryUnavailable(_) | ConvertError::DaemonTimeout { .. }
        )
    }
}
