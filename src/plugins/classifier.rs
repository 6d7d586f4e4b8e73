//! Classifier: is this account an AD mobile account?

use crate::core::directory::DirectoryService;
use crate::core::error::ConvertError;
use crate::core::record::{ADMIN_GROUP, AccountRecord, UserRecord};
use serde::Serialize;

/// A freshly read account plus the raw record it was built from.
#[derive(Debug, Clone)]
pub struct Classification {
    pub account: AccountRecord,
    pub record: UserRecord,
}

#[derive(Debug, Serialize)]
pub struct ClassificationSummary {
    pub username: String,
    pub uid: u32,
    pub ad_bound: bool,
    pub is_admin: bool,
    pub home: Option<String>,
    pub groups: Vec<String>,
}

impl Classification {
    pub fn summary(&self) -> ClassificationSummary {
        ClassificationSummary {
            username: self.account.username.clone(),
            uid: self.account.uid,
            ad_bound: self.account.ad_bound,
            is_admin: self.account.is_admin,
            home: self
                .account
                .home
                .as_ref()
                .map(|h| h.to_string_lossy().to_string()),
            groups: self.account.groups.clone(),
        }
    }
}

/// Read-only. A failed query aborts instead of defaulting to "local".
pub fn classify(
    directory: &dyn DirectoryService,
    username: &str,
) -> Result<Classification, ConvertError> {
    let record = directory
        .read_user(username)?
        .ok_or_else(|| ConvertError::UserNotFound(username.to_string()))?;

    let uid = record.unique_id().ok_or_else(|| {
        ConvertError::ValidationError(format!("'{}' has no numeric UniqueID", username))
    })?;

    let ad_bound = AccountRecord::detect_ad_binding(&record);
    let mut groups = directory.user_groups(username)?;
    groups.sort();
    groups.dedup();
    let is_admin = directory.is_member(username, ADMIN_GROUP)?;

    tracing::debug!(user = username, uid, ad_bound, is_admin, "classified account");

    let account = AccountRecord {
        username: username.to_string(),
        uid,
        home: record.home_dir(),
        primary_gid: record.primary_group_id().unwrap_or_default(),
        groups,
        is_admin,
        ad_bound,
    };
    Ok(Classification { account, record })
}
