#[path = "../support/mod.rs"]
mod support;

use mobileconv::core::error::ConvertError;
use mobileconv::core::record::{ATTR_AUTH_AUTHORITY, ATTR_SMBSID};
use mobileconv::plugins::classifier::classify;
use support::{FakeHost, SHADOW, cached_user_entry, local_record, mobile_record};

#[test]
fn mobile_account_is_ad_bound() {
    let host = FakeHost::new();
    host.add_user(mobile_record("jdoe", 1_104_993_212, None));
    host.add_member("staff", "jdoe");
    host.add_ad_membership("jdoe", "admin");
    host.add_ad_membership("jdoe", "CORP\\Domain Users");

    let before = host.state();
    let c = classify(&host, "jdoe").unwrap();

    assert!(c.account.ad_bound);
    assert!(c.account.is_admin);
    assert_eq!(c.account.uid, 1_104_993_212);
    assert_eq!(c.account.groups, vec!["CORP\\Domain Users", "admin", "staff"]);
    assert_eq!(host.state(), before, "classification must not mutate");
    assert_eq!(host.writes.get(), 0);
}

#[test]
fn ad_marker_in_authority_alone_counts() {
    let host = FakeHost::new();
    let mut record = local_record("mara", 502, None);
    record.set(
        ATTR_AUTH_AUTHORITY,
        vec![SHADOW.to_string(), cached_user_entry("mara")],
    );
    host.add_user(record);

    assert!(classify(&host, "mara").unwrap().account.ad_bound);
}

#[test]
fn smbsid_alone_counts() {
    let host = FakeHost::new();
    let mut record = local_record("lee", 503, None);
    record.set(ATTR_SMBSID, vec!["S-1-5-21-1-2-3-1001".to_string()]);
    host.add_user(record);

    assert!(classify(&host, "lee").unwrap().account.ad_bound);
}

#[test]
fn plain_local_account_is_not_ad_bound() {
    let host = FakeHost::new();
    host.add_user(local_record("admin2", 501, None));
    host.add_member("admin", "admin2");

    let c = classify(&host, "admin2").unwrap();
    assert!(!c.account.ad_bound);
    assert!(c.account.is_admin);
    assert_eq!(c.account.primary_gid, 20);
    assert_eq!(c.summary().username, "admin2");
}

#[test]
fn unknown_user_is_reported() {
    let host = FakeHost::new();
    let err = classify(&host, "ghost").unwrap_err();
    assert!(matches!(err, ConvertError::UserNotFound(ref u) if u == "ghost"));
}

#[test]
fn unavailable_directory_aborts_instead_of_defaulting_to_local() {
    let host = FakeHost::new();
    host.add_user(mobile_record("jdoe", 1_104_993_212, None));
    host.directory_down.set(true);

    let err = classify(&host, "jdoe").unwrap_err();
    assert!(matches!(err, ConvertError::DirectoryUnavailable(_)));
    assert!(err.is_environment());
}
