//! AccountConverter: drives one user through every phase, and batches of
//! users one at a time.
//!
//! The daemon restart inside the strip phase is machine-wide, so users are
//! never converted concurrently. Nothing is rolled back on failure; a
//! re-run picks up from the pending snapshot.

use crate::core::context::{ConversionContext, Stage, StageTracker};
use crate::core::directory::{DirectoryService, UnbindCredentials};
use crate::core::error::ConvertError;
use crate::core::store::SnapshotState;
use crate::plugins::admin::{self, AdminOutcome};
use crate::plugins::classifier;
use crate::plugins::reconciler::{self, ReconcileReport};
use crate::plugins::state_saver;
use crate::plugins::stripper::{self, StripReport};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub username: String,
    pub ad_bound: bool,
    /// An interrupted conversion was finished from its pending snapshot.
    pub resumed: bool,
    pub final_stage: Stage,
    pub strip: Option<StripReport>,
    pub reconcile: Option<ReconcileReport>,
    pub admin: AdminOutcome,
    pub warnings: Vec<String>,
}

impl ConversionReport {
    pub fn all_warnings(&self) -> Vec<String> {
        let mut all = self.warnings.clone();
        if let Some(strip) = &self.strip {
            all.extend(strip.warnings.iter().cloned());
        }
        if let Some(rec) = &self.reconcile {
            all.extend(rec.warnings.iter().cloned());
        }
        all
    }
}

/// How a user ended up in the run. Accounts picked up by `--all` that turn
/// out to be local are never touched; the admin policy reaches a local
/// account only when it was named explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Named,
    Discovered,
}

pub fn convert_user(
    ctx: &ConversionContext<'_>,
    username: &str,
) -> Result<ConversionReport, ConvertError> {
    convert_selected(ctx, username, Selection::Named)
}

pub fn convert_selected(
    ctx: &ConversionContext<'_>,
    username: &str,
    selection: Selection,
) -> Result<ConversionReport, ConvertError> {
    let mut tracker = StageTracker::new(ctx.audit, username);
    let result = run_phases(ctx, &mut tracker, username, selection);
    if let Err(e) = &result {
        tracker.fail(e);
    }
    result
}

fn run_phases(
    ctx: &ConversionContext<'_>,
    tracker: &mut StageTracker<'_>,
    username: &str,
    selection: Selection,
) -> Result<ConversionReport, ConvertError> {
    let directory = ctx.host.directory;
    let classification = classifier::classify(directory, username)?;
    let account = &classification.account;

    let pending = ctx
        .store
        .manifest(username)?
        .is_some_and(|m| m.state == SnapshotState::Pending);
    let resumed = !account.ad_bound && pending;

    if !account.ad_bound && !resumed {
        tracker.advance(Stage::Local)?;
        let admin = if selection == Selection::Named {
            tracing::info!(user = username, "not an AD mobile account; only admin policy applies");
            let outcome =
                admin::apply_policy(directory, ctx.policy, username, false, account.is_admin)?;
            tracker.advance(Stage::AdminPolicyApplied)?;
            outcome
        } else {
            tracing::info!(user = username, "local account found by --all; left untouched");
            AdminOutcome::Untouched
        };
        tracker.advance(Stage::Terminal)?;
        return Ok(ConversionReport {
            username: username.to_string(),
            ad_bound: false,
            resumed: false,
            final_stage: tracker.stage(),
            strip: None,
            reconcile: None,
            admin,
            warnings: Vec::new(),
        });
    }

    tracker.advance(Stage::AdBound)?;
    if resumed {
        tracing::warn!(user = username, "finishing an interrupted conversion");
    }
    let credential = stripper::local_credential(username, &classification.record)?;

    let saved = state_saver::save_state(ctx, account)?;
    tracker.advance(Stage::Snapshotted)?;

    let strip = stripper::strip_attributes(ctx, username, &classification.record)?;
    tracker.advance(Stage::Stripped)?;

    stripper::restart_directory_daemon(ctx)?;
    tracker.advance(Stage::DaemonRestarted)?;
    let warnings = stripper::verify_stripped(ctx, username, &credential)?;

    let reconcile = reconciler::reconcile(ctx, username, &saved.snapshot)?;
    tracker.advance(Stage::Reconciled)?;

    let admin = admin::apply_policy(
        directory,
        ctx.policy,
        username,
        true,
        saved.snapshot.had_admin,
    )?;
    tracker.advance(Stage::AdminPolicyApplied)?;

    ctx.store.mark_applied(username)?;
    tracker.advance(Stage::Terminal)?;

    Ok(ConversionReport {
        username: username.to_string(),
        ad_bound: true,
        resumed,
        final_stage: tracker.stage(),
        strip: Some(strip),
        reconcile: Some(reconcile),
        admin,
        warnings,
    })
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub converted: Vec<ConversionReport>,
    pub failures: Vec<BatchFailure>,
    /// User whose environment error stopped the batch early.
    pub aborted_at: Option<String>,
    #[serde(skip)]
    pub abort_error: Option<ConvertError>,
}

#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub username: String,
    pub error: String,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.abort_error.is_none()
    }
}

/// Users eligible for `convert --all`: UID at or above `min_uid`, not a
/// service account. Sorted for a stable processing order.
pub fn candidate_users(
    directory: &dyn DirectoryService,
    min_uid: u32,
) -> Result<Vec<String>, ConvertError> {
    let mut users: Vec<String> = directory
        .list_users()?
        .into_iter()
        .filter(|(name, uid)| *uid >= min_uid && !name.starts_with('_'))
        .map(|(name, _)| name)
        .collect();
    users.sort();
    users.dedup();
    Ok(users)
}

pub fn convert_many(
    ctx: &ConversionContext<'_>,
    usernames: &[String],
    selection: Selection,
) -> BatchReport {
    let mut report = BatchReport::default();
    for username in usernames {
        match convert_selected(ctx, username, selection) {
            Ok(r) => report.converted.push(r),
            Err(e) if e.is_environment() => {
                report.failures.push(BatchFailure {
                    username: username.clone(),
                    error: e.to_string(),
                });
                report.aborted_at = Some(username.clone());
                report.abort_error = Some(e);
                break;
            }
            Err(e) => report.failures.push(BatchFailure {
                username: username.clone(),
                error: e.to_string(),
            }),
        }
    }
    report
}

/// Leave the AD domain if bound. Returns the domain that was left.
pub fn unbind_if_bound(
    directory: &dyn DirectoryService,
    credentials: &UnbindCredentials,
) -> Result<Option<String>, ConvertError> {
    let Some(domain) = directory.bound_domain()? else {
        tracing::info!("not bound to Active Directory; nothing to unbind");
        return Ok(None);
    };
    directory.unbind(credentials)?;
    if let Some(still) = directory.bound_domain()? {
        return Err(ConvertError::UnbindFailed(format!(
            "still bound to {} after dsconfigad -remove",
            still
        )));
    }
    tracing::info!(domain = %domain, "unbound from Active Directory");
    Ok(Some(domain))
}
