//! Adapter seams between the conversion phases and the host.
//!
//! Phases only see these traits. `core::macos` implements them on top of the
//! macOS command-line tools; tests drive the phases through an in-memory
//! host instead.

use crate::core::error::ConvertError;
use crate::core::record::UserRecord;
use std::path::Path;

/// Read/write access to local user and group records.
pub trait DirectoryService {
    /// `Ok(None)` means the record does not exist. Any other failure to
    /// query is `ConvertError::DirectoryUnavailable`.
    fn read_user(&self, username: &str) -> Result<Option<UserRecord>, ConvertError>;

    fn delete_attribute(&self, username: &str, attribute: &str) -> Result<(), ConvertError>;

    fn delete_attribute_value(
        &self,
        username: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), ConvertError>;

    /// Replace an attribute with a single value.
    fn set_attribute(&self, username: &str, attribute: &str, value: &str)
    -> Result<(), ConvertError>;

    /// Every user record name with its numeric UID.
    fn list_users(&self) -> Result<Vec<(String, u32)>, ConvertError>;

    /// Supplementary group names as reported for the user, unsorted.
    fn user_groups(&self, username: &str) -> Result<Vec<String>, ConvertError>;

    fn is_member(&self, username: &str, group: &str) -> Result<bool, ConvertError>;

    fn add_to_group(&self, username: &str, group: &str) -> Result<(), ConvertError>;

    fn remove_from_group(&self, username: &str, group: &str) -> Result<(), ConvertError>;

    /// Domain the machine is bound to, if any.
    fn bound_domain(&self) -> Result<Option<String>, ConvertError>;

    fn unbind(&self, credentials: &UnbindCredentials) -> Result<(), ConvertError>;
}

/// Process control for the directory-service daemon.
pub trait DaemonControl {
    /// Terminate the daemon so launchd respawns it.
    fn restart(&self) -> Result<(), ConvertError>;

    fn is_running(&self) -> bool;

    /// Daemon answers a trivial record read.
    fn is_responsive(&self) -> bool;
}

/// Ownership and ACL tooling for home folders.
pub trait HomeFolders {
    fn acl_listing(&self, home: &Path) -> Result<String, ConvertError>;

    fn set_owner_recursive(&self, home: &Path, uid: u32, gid: u32) -> Result<(), ConvertError>;
}

/// Login session lookup.
pub trait Session {
    /// Short name of the user at the console, `None` at the login window.
    fn console_user(&self) -> Result<Option<String>, ConvertError>;
}

/// Account used by `dsconfigad -remove`. A force-remove accepts any
/// credentials, so placeholders are used when none are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbindCredentials {
    pub user: String,
    pub password: String,
}

impl UnbindCredentials {
    pub fn placeholder() -> Self {
        Self {
            user: "nobody".to_string(),
            password: "nopassword".to_string(),
        }
    }
}

/// Everything a conversion talks to, borrowed for one invocation.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub directory: &'a dyn DirectoryService,
    pub daemon: &'a dyn DaemonControl,
    pub homes: &'a dyn HomeFolders,
}
