#[path = "../support/mod.rs"]
mod support;

use mobileconv::core::audit::AuditLog;
use mobileconv::core::config::{AdminPolicy, Config, ENV_ADMIN_POLICY, ENV_UNBIND_PASSWORD};
use mobileconv::core::context::Stage;
use mobileconv::core::directory::UnbindCredentials;
use mobileconv::core::error::ConvertError;
use mobileconv::core::record::{ATTR_AUTH_AUTHORITY, DirectoryAttributeSet};
use mobileconv::core::store::{BackupStore, GROUPS_FILE, PermissionSnapshot, SnapshotState};
use mobileconv::plugins::admin::AdminOutcome;
use mobileconv::plugins::converter::{
    Selection, candidate_users, convert_many, convert_user, unbind_if_bound,
};
use mobileconv::plugins::doctor::{CheckStatus, run_preflight_checks};
use std::fs;
use std::path::Path;
use support::{FakeHost, SHADOW, local_record, mobile_record};
use tempfile::tempdir;

const JDOE_UID: u32 = 1_104_993_212;

/// An AD admin with a local group reached through cached AD membership.
fn mobile_admin(host: &FakeHost, home: Option<&Path>) {
    host.add_user(mobile_record("jdoe", JDOE_UID, home));
    host.add_member("staff", "jdoe");
    host.add_ad_membership("jdoe", "admin");
    host.add_ad_membership("jdoe", "engineering");
    host.add_ad_membership("jdoe", "SALES\\users");
}

#[test]
fn mobile_account_converts_end_to_end() {
    let tmp = tempdir().unwrap();
    let home = tmp.path().join("Users/jdoe");
    fs::create_dir_all(&home).unwrap();
    let store = BackupStore::new(tmp.path().join("backups"));
    let audit = AuditLog::new(&store.root);
    let host = FakeHost::new();
    mobile_admin(&host, Some(&home));
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    let report = convert_user(&ctx, "jdoe").unwrap();
    assert!(report.ad_bound);
    assert!(!report.resumed);
    assert_eq!(report.final_stage, Stage::Terminal);
    assert_eq!(report.admin, AdminOutcome::Promoted);

    let record = host.record("jdoe");
    assert!(DirectoryAttributeSet::present_in(&record).is_empty());
    assert_eq!(record.get(ATTR_AUTH_AUTHORITY).unwrap(), &[SHADOW.to_string()][..]);
    assert_eq!(record.primary_group_id(), Some(20));
    assert!(host.local_member("engineering", "jdoe"));
    assert!(host.local_member("admin", "jdoe"));
    assert!(host.local_member("staff", "jdoe"));
    assert_eq!(host.restarts.get(), 1);
    assert_eq!(*host.chowned.borrow(), vec![(home, JDOE_UID, 20)]);

    let manifest = store.manifest("jdoe").unwrap().unwrap();
    assert_eq!(manifest.state, SnapshotState::Applied);
    let groups = fs::read_to_string(store.root.join("jdoe").join(GROUPS_FILE)).unwrap();
    assert!(groups.lines().any(|g| g == "SALES\\users"));

    let stages: Vec<String> = audit
        .read_events()
        .unwrap()
        .into_iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(
        stages,
        vec![
            "ad-bound",
            "snapshotted",
            "stripped",
            "daemon-restarted",
            "reconciled",
            "admin-policy-applied",
            "terminal"
        ]
    );
}

#[test]
fn converting_twice_changes_nothing_the_second_time() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    convert_user(&ctx, "jdoe").unwrap();
    let before = host.state();
    let writes = host.writes.get();

    let second = convert_user(&ctx, "jdoe").unwrap();
    assert!(!second.ad_bound);
    assert_eq!(second.admin, AdminOutcome::Untouched);
    assert_eq!(host.state(), before);
    assert_eq!(host.writes.get(), writes);
    assert_eq!(host.restarts.get(), 1);
}

#[test]
fn local_account_is_left_alone() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path().join("backups"));
    let audit = AuditLog::new(&store.root);
    let host = FakeHost::new();
    host.add_user(local_record("mara", 501, None));
    host.add_member("admin", "mara");
    host.add_member("staff", "mara");
    let ctx = host.context(&store, &audit, AdminPolicy::DemoteIfAd);

    let before = host.state();
    let report = convert_user(&ctx, "mara").unwrap();
    assert!(!report.ad_bound);
    assert!(report.strip.is_none());
    assert_eq!(report.admin, AdminOutcome::Untouched);
    assert_eq!(host.state(), before);
    assert_eq!(host.restarts.get(), 0);
    assert!(store.manifest("mara").unwrap().is_none());
}

#[test]
fn demote_policy_leaves_former_ad_admin_without_admin() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    // Also a direct local member, not only through AD.
    host.add_member("admin", "jdoe");
    let ctx = host.context(&store, &audit, AdminPolicy::Demote);

    let report = convert_user(&ctx, "jdoe").unwrap();
    assert_eq!(report.admin, AdminOutcome::Demoted);
    assert!(!host.local_member("admin", "jdoe"));
    assert!(tmp.path().join("jdoe/admin.remove").exists());
}

#[test]
fn interrupted_conversion_resumes_from_pending_snapshot() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    host.daemon_dead.set(true);
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    let err = convert_user(&ctx, "jdoe").unwrap_err();
    assert!(matches!(err, ConvertError::DaemonTimeout { .. }));
    assert_eq!(
        store.manifest("jdoe").unwrap().unwrap().state,
        SnapshotState::Pending
    );
    assert!(!host.local_member("engineering", "jdoe"));
    let failed = audit.read_events().unwrap().into_iter().last().unwrap();
    assert_eq!((failed.stage.as_str(), failed.status.as_str()), ("stripped", "failed"));

    host.daemon_dead.set(false);
    let report = convert_user(&ctx, "jdoe").unwrap();
    assert!(report.resumed);
    assert_eq!(report.final_stage, Stage::Terminal);
    assert_eq!(report.reconcile.unwrap().restored, vec!["engineering"]);
    assert_eq!(report.admin, AdminOutcome::Promoted);
    assert_eq!(
        store.manifest("jdoe").unwrap().unwrap().state,
        SnapshotState::Applied
    );
}

#[test]
fn account_without_shadow_hash_is_refused_before_any_change() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    let mut record = mobile_record("jdoe", JDOE_UID, None);
    record.set(
        ATTR_AUTH_AUTHORITY,
        vec![support::kerberos_entry("jdoe"), support::cached_user_entry("jdoe")],
    );
    host.add_user(record);
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    let before = host.state();
    let err = convert_user(&ctx, "jdoe").unwrap_err();
    assert!(matches!(err, ConvertError::MissingCredential(_)));
    assert_eq!(host.state(), before);
    assert!(store.manifest("jdoe").unwrap().is_none());
}

#[test]
fn batch_continues_past_user_errors() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    let batch = convert_many(
        &ctx,
        &["ghost".to_string(), "jdoe".to_string()],
        Selection::Named,
    );
    assert!(!batch.succeeded());
    assert!(batch.abort_error.is_none());
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].username, "ghost");
    assert_eq!(batch.converted.len(), 1);
}

#[test]
fn batch_stops_on_environment_error() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    host.add_user(mobile_record("mara", 1_104_993_300, None));
    host.directory_down.set(true);
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    let batch = convert_many(
        &ctx,
        &["jdoe".to_string(), "mara".to_string()],
        Selection::Named,
    );
    assert_eq!(batch.aborted_at.as_deref(), Some("jdoe"));
    assert!(matches!(
        batch.abort_error,
        Some(ConvertError::DirectoryUnavailable(_))
    ));
    assert_eq!(batch.failures.len(), 1);
    assert!(batch.converted.is_empty());
}

#[test]
fn daemon_timeout_stops_batch_with_its_own_error() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    host.add_user(mobile_record("mara", 1_104_993_300, None));
    host.daemon_dead.set(true);
    let ctx = host.context(&store, &audit, AdminPolicy::Preserve);

    let batch = convert_many(
        &ctx,
        &["jdoe".to_string(), "mara".to_string()],
        Selection::Named,
    );
    assert!(!batch.succeeded());
    assert_eq!(batch.aborted_at.as_deref(), Some("jdoe"));
    let err = batch.abort_error.unwrap();
    assert!(matches!(err, ConvertError::DaemonTimeout { .. }));
    assert!(err.to_string().starts_with("Timed out"));
    assert!(
        host.record("mara").contains_key("SMBSID"),
        "batch must stop before the next user"
    );
}

#[test]
fn convert_all_leaves_local_admins_alone_under_demote() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    mobile_admin(&host, None);
    host.add_user(local_record("mgmt", 501, None));
    host.add_member("admin", "mgmt");
    host.add_member("staff", "mgmt");
    let ctx = host.context(&store, &audit, AdminPolicy::Demote);

    let users = candidate_users(&host, 501).unwrap();
    assert_eq!(users, vec!["jdoe", "mgmt"]);
    let before = host.record("mgmt");

    let batch = convert_many(&ctx, &users, Selection::Discovered);
    assert!(batch.succeeded());
    assert!(host.local_member("admin", "mgmt"));
    assert!(host.local_member("staff", "mgmt"));
    assert_eq!(host.record("mgmt"), before);
    assert!(!host.local_member("admin", "jdoe"));

    let mgmt = batch.converted.iter().find(|r| r.username == "mgmt").unwrap();
    assert_eq!(mgmt.admin, AdminOutcome::Untouched);
    assert_eq!(mgmt.final_stage, Stage::Terminal);
}

#[test]
fn named_local_account_gets_the_admin_policy() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let audit = AuditLog::new(tmp.path());
    let host = FakeHost::new();
    host.add_user(local_record("mara", 501, None));
    host.add_member("admin", "mara");
    let ctx = host.context(&store, &audit, AdminPolicy::Demote);

    let report = convert_user(&ctx, "mara").unwrap();
    assert_eq!(report.admin, AdminOutcome::Demoted);
    assert!(!host.local_member("admin", "mara"));
}

#[test]
fn candidates_skip_system_and_service_accounts() {
    let host = FakeHost::new();
    host.add_user(local_record("root", 0, None));
    host.add_user(local_record("_mbsetupuser", 248, None));
    host.add_user(local_record("_svc", 700, None));
    host.add_user(local_record("mara", 501, None));
    host.add_user(mobile_record("jdoe", JDOE_UID, None));

    assert_eq!(candidate_users(&host, 501).unwrap(), vec!["jdoe", "mara"]);
}

#[test]
fn unbind_leaves_domain_once() {
    let host = FakeHost::new();
    *host.bound_domain.borrow_mut() = Some("corp.example.com".to_string());
    let creds = UnbindCredentials::placeholder();

    assert_eq!(
        unbind_if_bound(&host, &creds).unwrap(),
        Some("corp.example.com".to_string())
    );
    assert_eq!(unbind_if_bound(&host, &creds).unwrap(), None);

    *host.bound_domain.borrow_mut() = Some("corp.example.com".to_string());
    host.fail_unbind.set(true);
    assert!(matches!(
        unbind_if_bound(&host, &creds),
        Err(ConvertError::UnbindFailed(_))
    ));
}

#[test]
fn snapshot_digest_mismatch_is_detected() {
    let tmp = tempdir().unwrap();
    let store = BackupStore::new(tmp.path());
    let snapshot = PermissionSnapshot::new("jdoe", ["engineering", "staff"], false, None);
    store.save(&snapshot, "admin.preserve", "run-1").unwrap();

    fs::write(tmp.path().join("jdoe").join(GROUPS_FILE), "admin\nstaff\n").unwrap();
    let err = store.load("jdoe").unwrap_err();
    assert!(err.to_string().contains("digest"));

    assert!(store.save(&snapshot, "admin.keep", "run-1").is_err());
    assert!(store.user_dir("../etc").is_err());
}

#[test]
fn config_file_then_env_overrides() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    fs::write(
        &path,
        r#"
admin_policy = "demote-if-ad"
backup_root = "/var/db/mobileconv"
min_uid = 1000

[daemon]
poll_interval_ms = 250
timeout_secs = 10
"#,
    )
    .unwrap();

    let mut config = Config::from_file(&path).unwrap();
    assert_eq!(config.admin_policy, AdminPolicy::DemoteIfAd);
    assert_eq!(config.min_uid, 1000);
    assert_eq!(config.staff_gid, 20);
    assert_eq!(config.daemon.poll_policy().timeout.as_secs(), 10);

    config
        .apply_env_overrides(|key| match key {
            k if k == ENV_ADMIN_POLICY => Some("demote".to_string()),
            k if k == ENV_UNBIND_PASSWORD => Some("s3cret".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.admin_policy, AdminPolicy::Demote);
    assert_eq!(config.unbind.password.as_deref(), Some("s3cret"));

    assert!(Config::load(Some(tmp.path().join("missing.toml").as_path())).is_err());
    fs::write(&path, "admin_policy = \"sometimes\"").unwrap();
    assert!(matches!(
        Config::from_file(&path),
        Err(ConvertError::ConfigError { .. })
    ));
}

#[test]
fn doctor_reports_daemon_and_binding() {
    let tmp = tempdir().unwrap();
    let config = Config {
        backup_root: tmp.path().join("backups"),
        ..Config::default()
    };
    let host = FakeHost::new();
    *host.bound_domain.borrow_mut() = Some("corp.example.com".to_string());

    let report = run_preflight_checks(&config, Some(tmp.path().join("none.toml").as_path()), &host, &host);
    let status = |name: &str| {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
            .unwrap()
    };
    assert_eq!(status("Directory daemon"), CheckStatus::Pass);
    assert_eq!(status("AD binding"), CheckStatus::Pass);
    assert_eq!(status("Backup root"), CheckStatus::Pass);
    assert_eq!(status("Config"), CheckStatus::Pass);

    host.daemon_dead.set(true);
    let report = run_preflight_checks(&config, None, &host, &host);
    let daemon = report
        .checks
        .iter()
        .find(|c| c.name == "Directory daemon")
        .unwrap();
    assert_eq!(daemon.status, CheckStatus::Fail);
    assert!(report.failed >= 1);
}
