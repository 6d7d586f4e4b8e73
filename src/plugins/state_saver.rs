//! StateSaver: persist group and admin state before anything is changed.

use crate::core::context::ConversionContext;
use crate::core::error::ConvertError;
use crate::core::record::AccountRecord;
use crate::core::store::{PermissionSnapshot, SnapshotState};

#[derive(Debug, Clone)]
pub struct SavedState {
    pub snapshot: PermissionSnapshot,
    /// True when an interrupted run's snapshot was picked up instead of
    /// taking a new one.
    pub reused: bool,
}

pub fn save_state(
    ctx: &ConversionContext<'_>,
    account: &AccountRecord,
) -> Result<SavedState, ConvertError> {
    let username = account.username.as_str();

    // A pending snapshot predates the interrupted run's mutations; the live
    // groups may already have lost their AD-derived entries.
    if let Some(manifest) = ctx.store.manifest(username)?
        && manifest.state == SnapshotState::Pending
        && let Some((snapshot, _)) = ctx.store.load(username)?
    {
        tracing::warn!(
            user = username,
            run_id = %manifest.run_id,
            "reusing snapshot from an interrupted conversion"
        );
        return Ok(SavedState {
            snapshot,
            reused: true,
        });
    }

    let home_acl = match &account.home {
        Some(home) if home.is_dir() => match ctx.host.homes.acl_listing(home) {
            Ok(listing) => Some(listing),
            Err(e) => {
                tracing::warn!(user = username, home = %home.display(), error = %e, "home ACL listing failed");
                None
            }
        },
        _ => None,
    };

    let snapshot = PermissionSnapshot::new(
        username,
        account.groups.iter().cloned(),
        account.is_admin,
        home_acl,
    );
    let marker = ctx.policy.marker_name(account.ad_bound);
    let manifest = ctx.store.save(&snapshot, marker, ctx.audit.run_id())?;

    tracing::info!(
        user = username,
        groups = snapshot.groups.len(),
        had_admin = snapshot.had_admin,
        digest = %manifest.groups_sha256,
        "permission snapshot written"
    );
    Ok(SavedState {
        snapshot,
        reused: false,
    })
}
