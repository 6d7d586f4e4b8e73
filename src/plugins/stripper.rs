//! AttributeStripper: remove AD-origin attributes and credential
//! authorities, then bounce the directory daemon.
//!
//! `AuthenticationAuthority` is only ever edited value by value. Deleting
//! the attribute and recreating it from the ShadowHash entry would leave
//! the account with no credential at all if anything failed in between.

use crate::core::context::ConversionContext;
use crate::core::error::ConvertError;
use crate::core::poll::{PollOutcome, poll_until};
use crate::core::record::{ATTR_AUTH_AUTHORITY, AuthorityEntry, DirectoryAttributeSet, UserRecord};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StripReport {
    pub deleted_attributes: Vec<String>,
    pub removed_authorities: Vec<String>,
    pub warnings: Vec<String>,
}

/// The ShadowHash entry that must survive conversion. Missing it means the
/// account would end up without a usable password.
pub fn local_credential(username: &str, record: &UserRecord) -> Result<AuthorityEntry, ConvertError> {
    record
        .authentication_authority()
        .shadow_hash()
        .cloned()
        .ok_or_else(|| {
            ConvertError::MissingCredential(format!(
                "'{}' has no ShadowHash authority; refusing to convert",
                username
            ))
        })
}

pub fn strip_attributes(
    ctx: &ConversionContext<'_>,
    username: &str,
    record: &UserRecord,
) -> Result<StripReport, ConvertError> {
    let directory = ctx.host.directory;
    let mut report = StripReport::default();

    for attribute in DirectoryAttributeSet::present_in(record) {
        match directory.delete_attribute(username, attribute) {
            Ok(()) => report.deleted_attributes.push(attribute.to_string()),
            Err(e) if e.is_environment() => return Err(e),
            Err(e) => {
                tracing::warn!(user = username, attribute, error = %e, "attribute delete failed");
                report.warnings.push(format!("delete {}: {}", attribute, e));
            }
        }
    }

    for entry in record.authentication_authority().removable() {
        match directory.delete_attribute_value(username, ATTR_AUTH_AUTHORITY, entry.as_str()) {
            Ok(()) => report.removed_authorities.push(entry.as_str().to_string()),
            Err(e) if e.is_environment() => return Err(e),
            Err(e) => {
                tracing::warn!(user = username, entry = entry.as_str(), error = %e, "authority removal failed");
                report
                    .warnings
                    .push(format!("remove authority {}: {}", entry.as_str(), e));
            }
        }
    }

    tracing::info!(
        user = username,
        attributes = report.deleted_attributes.len(),
        authorities = report.removed_authorities.len(),
        "AD attributes stripped"
    );
    Ok(report)
}

/// Restart the daemon and wait, bounded, for it to answer again.
pub fn restart_directory_daemon(ctx: &ConversionContext<'_>) -> Result<PollOutcome, ConvertError> {
    let daemon = ctx.host.daemon;
    daemon.restart()?;
    let outcome = poll_until(ctx.daemon_poll, || {
        daemon.is_running() && daemon.is_responsive()
    });
    match outcome {
        PollOutcome::Ready { attempts, waited } => {
            tracing::info!(attempts, waited_ms = waited.as_millis() as u64, "directory daemon back");
            Ok(outcome)
        }
        PollOutcome::TimedOut { waited, .. } => Err(ConvertError::DaemonTimeout {
            what: "directory service daemon".to_string(),
            waited_ms: waited.as_millis() as u64,
        }),
    }
}

/// Re-read after the restart. Leftover AD data is a warning; a changed or
/// missing ShadowHash entry is fatal.
pub fn verify_stripped(
    ctx: &ConversionContext<'_>,
    username: &str,
    credential: &AuthorityEntry,
) -> Result<Vec<String>, ConvertError> {
    let record = ctx
        .host
        .directory
        .read_user(username)?
        .ok_or_else(|| ConvertError::UserNotFound(username.to_string()))?;

    let mut warnings = Vec::new();
    for attribute in DirectoryAttributeSet::present_in(&record) {
        warnings.push(format!("{} still present after strip", attribute));
    }
    let authorities = record.authentication_authority();
    for entry in authorities.removable() {
        warnings.push(format!("authority still present: {}", entry.as_str()));
    }
    for w in &warnings {
        tracing::warn!(user = username, "{}", w);
    }

    match authorities.shadow_hash() {
        Some(current) if current == credential => Ok(warnings),
        Some(_) => Err(ConvertError::MissingCredential(format!(
            "ShadowHash authority of '{}' changed during conversion",
            username
        ))),
        None => Err(ConvertError::MissingCredential(format!(
            "ShadowHash authority of '{}' disappeared during conversion",
            username
        ))),
    }
}
