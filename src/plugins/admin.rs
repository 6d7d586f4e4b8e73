//! Admin group membership: promote, demote, and the conversion policy.

use crate::core::config::AdminPolicy;
use crate::core::directory::DirectoryService;
use crate::core::error::ConvertError;
use crate::core::record::ADMIN_GROUP;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdminOutcome {
    Demoted,
    Promoted,
    AlreadyAdmin,
    NotAdmin,
    /// Policy left membership alone.
    Untouched,
}

impl fmt::Display for AdminOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdminOutcome::Demoted => "demoted",
            AdminOutcome::Promoted => "promoted",
            AdminOutcome::AlreadyAdmin => "already admin",
            AdminOutcome::NotAdmin => "not admin",
            AdminOutcome::Untouched => "untouched",
        };
        f.write_str(s)
    }
}

/// Remove from admin. Failing to remove a confirmed member is fatal.
pub fn demote(directory: &dyn DirectoryService, username: &str) -> Result<AdminOutcome, ConvertError> {
    if !directory.is_member(username, ADMIN_GROUP)? {
        tracing::info!(user = username, "not an admin; nothing to demote");
        return Ok(AdminOutcome::NotAdmin);
    }

    directory
        .remove_from_group(username, ADMIN_GROUP)
        .map_err(|e| ConvertError::AdminDemotionFailed {
            user: username.to_string(),
            reason: e.to_string(),
        })?;

    if directory.is_member(username, ADMIN_GROUP)? {
        return Err(ConvertError::AdminDemotionFailed {
            user: username.to_string(),
            reason: "still a member after removal".to_string(),
        });
    }
    tracing::info!(user = username, "removed from admin");
    Ok(AdminOutcome::Demoted)
}

pub fn promote(directory: &dyn DirectoryService, username: &str) -> Result<AdminOutcome, ConvertError> {
    if directory.is_member(username, ADMIN_GROUP)? {
        tracing::info!(user = username, "already an admin");
        return Ok(AdminOutcome::AlreadyAdmin);
    }
    directory.add_to_group(username, ADMIN_GROUP)?;
    if !directory.is_member(username, ADMIN_GROUP)? {
        return Err(ConvertError::ValidationError(format!(
            "'{}' is still not an admin after promotion",
            username
        )));
    }
    tracing::info!(user = username, "added to admin");
    Ok(AdminOutcome::Promoted)
}

/// Apply the configured policy. Under `preserve`, an account that lost
/// admin rights it held through AD is put back into the group.
pub fn apply_policy(
    directory: &dyn DirectoryService,
    policy: AdminPolicy,
    username: &str,
    ad_bound: bool,
    had_admin: bool,
) -> Result<AdminOutcome, ConvertError> {
    if policy.demotes(ad_bound) {
        return demote(directory, username);
    }
    if had_admin && !directory.is_member(username, ADMIN_GROUP)? {
        tracing::info!(user = username, %policy, "restoring admin membership held before conversion");
        return promote(directory, username);
    }
    Ok(AdminOutcome::Untouched)
}
