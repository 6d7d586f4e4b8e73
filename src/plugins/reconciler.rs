//! Reconciler: make the now-local account whole again.

use crate::core::context::ConversionContext;
use crate::core::error::ConvertError;
use crate::core::record::{ADMIN_GROUP, ATTR_PRIMARY_GROUP_ID, STAFF_GROUP};
use crate::core::store::PermissionSnapshot;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Domain separator used in AD-qualified group names (`CORP\Domain Users`).
const DOMAIN_SEPARATOR: char = '\\';

/// Groups macOS computes on the fly; membership cannot be edited.
const IMPLICIT_GROUPS: &[&str] = &[
    "everyone",
    "localaccounts",
    "netaccounts",
    "authedusers",
    "interactusers",
    "consoleusers",
];

// Unresolved GIDs print as bare numbers; AD conflict objects carry `CNF:`.
static AD_ARTIFACT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^\d+$").unwrap(),
        Regex::new(r"(?i)CNF:").unwrap(),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupPlan {
    pub restore: Vec<String>,
    pub skipped: Vec<String>,
}

/// Split snapshot groups into those worth re-adding and those skipped.
pub fn plan_group_restore(groups: &[String]) -> GroupPlan {
    let mut plan = GroupPlan {
        restore: Vec::new(),
        skipped: Vec::new(),
    };
    for group in groups {
        if is_skipped_group(group) {
            plan.skipped.push(group.clone());
        } else {
            plan.restore.push(group.clone());
        }
    }
    plan
}

fn is_skipped_group(group: &str) -> bool {
    group == STAFF_GROUP
        || group == ADMIN_GROUP
        || group.contains(DOMAIN_SEPARATOR)
        || IMPLICIT_GROUPS.contains(&group)
        || AD_ARTIFACT_PATTERNS.iter().any(|re| re.is_match(group))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub uid: u32,
    pub primary_group_changed: bool,
    pub ownership_fixed: bool,
    pub staff_added: bool,
    pub restored: Vec<String>,
    pub already_member: Vec<String>,
    pub skipped: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn reconcile(
    ctx: &ConversionContext<'_>,
    username: &str,
    snapshot: &PermissionSnapshot,
) -> Result<ReconcileReport, ConvertError> {
    let directory = ctx.host.directory;

    // Resolve again after the daemon restart; the pre-restart record may be stale.
    let record = directory
        .read_user(username)?
        .ok_or_else(|| ConvertError::UserNotFound(username.to_string()))?;
    let uid = record.unique_id().ok_or_else(|| {
        ConvertError::ValidationError(format!("'{}' has no numeric UniqueID", username))
    })?;

    let mut report = ReconcileReport {
        uid,
        ..ReconcileReport::default()
    };

    if record.primary_group_id() != Some(ctx.staff_gid) {
        directory.set_attribute(username, ATTR_PRIMARY_GROUP_ID, &ctx.staff_gid.to_string())?;
        report.primary_group_changed = true;
        tracing::info!(user = username, gid = ctx.staff_gid, "primary group set to staff");
    }

    if let Some(home) = record.home_dir().filter(|h| h.is_dir()) {
        ctx.host.homes.set_owner_recursive(&home, uid, ctx.staff_gid)?;
        report.ownership_fixed = true;
        tracing::info!(user = username, home = %home.display(), uid, "home ownership reset");
    }

    if !directory.is_member(username, STAFF_GROUP)? {
        directory.add_to_group(username, STAFF_GROUP)?;
        report.staff_added = true;
    }

    let plan = plan_group_restore(&snapshot.groups);
    report.skipped = plan.skipped;
    for group in plan.restore {
        match directory.is_member(username, &group) {
            Ok(true) => {
                report.already_member.push(group);
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(user = username, group = %group, error = %e, "membership check failed");
                report.warnings.push(format!("check {}: {}", group, e));
                continue;
            }
        }
        match directory.add_to_group(username, &group) {
            Ok(()) => {
                tracing::info!(user = username, group = %group, "group membership restored");
                report.restored.push(group);
            }
            Err(e) => {
                tracing::warn!(user = username, group = %group, error = %e, "group restore failed");
                report.warnings.push(format!("restore {}: {}", group, e));
            }
        }
    }

    Ok(report)
}
