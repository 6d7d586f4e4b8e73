//! Typed views over directory-service user records.
//!
//! `dscl . -read /Users/<name>` prints one attribute per line. Short values
//! share the key's line separated by spaces; values containing spaces are
//! printed on indented continuation lines instead. Native attributes carry a
//! `dsAttrTypeNative:` prefix which is stripped here so callers can look keys
//! up by their bare names.

use std::collections::BTreeMap;
use std::path::PathBuf;

pub const STAFF_GROUP: &str = "staff";
pub const ADMIN_GROUP: &str = "admin";
pub const DEFAULT_STAFF_GID: u32 = 20;

pub const ATTR_RECORD_NAME: &str = "RecordName";
pub const ATTR_UNIQUE_ID: &str = "UniqueID";
pub const ATTR_PRIMARY_GROUP_ID: &str = "PrimaryGroupID";
pub const ATTR_HOME: &str = "NFSHomeDirectory";
pub const ATTR_SMBSID: &str = "SMBSID";
pub const ATTR_AUTH_AUTHORITY: &str = "AuthenticationAuthority";

const KEY_PREFIXES: &[&str] = &["dsAttrTypeNative:", "dsAttrTypeStandard:"];

/// Marker carried by AD-sourced authority entries and node names.
pub const ACTIVE_DIRECTORY_MARKER: &str = "Active Directory";

/// Raw attribute map of one user record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    attributes: BTreeMap<String, Vec<String>>,
}

impl UserRecord {
    pub fn parse(text: &str) -> Self {
        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in text.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                let value = line.trim();
                if let Some(key) = &current
                    && !value.is_empty()
                {
                    attributes.entry(key.clone()).or_default().push(value.to_string());
                }
                continue;
            }

            let Some((key, rest)) = split_key(line) else {
                current = None;
                continue;
            };
            let values = attributes.entry(key.clone()).or_default();
            values.extend(rest.split_whitespace().map(str::to_string));
            current = Some(key);
        }

        Self { attributes }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.attributes.get(key).map(Vec::as_slice)
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// True when the key exists with at least one non-empty value.
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|values| values.iter().any(|v| !v.trim().is_empty()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn set(&mut self, key: &str, values: Vec<String>) {
        self.attributes.insert(key.to_string(), values);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.attributes.remove(key)
    }

    /// Removes one value; the key is dropped once its last value goes.
    pub fn remove_value(&mut self, key: &str, value: &str) -> bool {
        let Some(values) = self.attributes.get_mut(key) else {
            return false;
        };
        let before = values.len();
        values.retain(|v| v != value);
        let removed = values.len() != before;
        if values.is_empty() {
            self.attributes.remove(key);
        }
        removed
    }

    pub fn record_name(&self) -> Option<&str> {
        self.first(ATTR_RECORD_NAME)
    }

    pub fn unique_id(&self) -> Option<u32> {
        self.first(ATTR_UNIQUE_ID).and_then(|v| v.parse().ok())
    }

    pub fn primary_group_id(&self) -> Option<u32> {
        self.first(ATTR_PRIMARY_GROUP_ID).and_then(|v| v.parse().ok())
    }

    /// Home directory, ignoring the `/dev/null` and empty placeholders.
    pub fn home_dir(&self) -> Option<PathBuf> {
        let raw = self.get(ATTR_HOME)?.join(" ");
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "/dev/null" {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    pub fn authentication_authority(&self) -> AuthenticationAuthorityList {
        AuthenticationAuthorityList::from_values(
            self.get(ATTR_AUTH_AUTHORITY).unwrap_or_default(),
        )
    }

    /// Render back in `dscl` text form. Used by fakes and diagnostics.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.attributes {
            if values.iter().any(|v| v.contains(' ')) {
                out.push_str(&format!("{}:\n", key));
                for v in values {
                    out.push_str(&format!(" {}\n", v));
                }
            } else {
                out.push_str(&format!("{}: {}\n", key, values.join(" ")));
            }
        }
        out
    }
}

fn split_key(line: &str) -> Option<(String, &str)> {
    let mut rest = line;
    for prefix in KEY_PREFIXES {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let idx = rest.find(':')?;
    let key = &rest[..idx];
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), &rest[idx + 1..]))
}

/// The fixed set of AD-origin attributes removed during conversion.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryAttributeSet;

impl DirectoryAttributeSet {
    pub const KEYS: &'static [&'static str] = &[
        "SMBSID",
        "SMBPrimaryGroupSID",
        "SMBScriptPath",
        "SMBPasswordLastSet",
        "SMBGroupRID",
        "PrimaryNTDomain",
        "OriginalAuthenticationAuthority",
        "OriginalNodeName",
        "AppleMetaRecordName",
        "cached_groups",
        "cached_auth_policy",
        "CopyTimestamp",
        "AltSecurityIdentities",
        "MCXSettings",
        "MCXFlags",
    ];

    /// Keys of the set that the record still carries, in list order.
    pub fn present_in(record: &UserRecord) -> Vec<&'static str> {
        Self::KEYS
            .iter()
            .copied()
            .filter(|k| record.contains_key(k))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityKind {
    ShadowHash,
    Kerberos,
    LocalCachedUser,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEntry(String);

impl AuthorityEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind from the tag between the first two `;` separators.
    pub fn kind(&self) -> AuthorityKind {
        let tag = self.0.split(';').nth(1).unwrap_or_default();
        match tag {
            "ShadowHash" => AuthorityKind::ShadowHash,
            "Kerberosv5" | "Kerberosv5Cert" => AuthorityKind::Kerberos,
            "LocalCachedUser" => AuthorityKind::LocalCachedUser,
            _ => AuthorityKind::Other,
        }
    }

    /// Only Kerberos and cached-user entries may ever be removed; a
    /// ShadowHash entry is kept whatever else it contains.
    pub fn is_removable(&self) -> bool {
        if self.kind() == AuthorityKind::ShadowHash {
            return false;
        }
        self.0.contains("Kerberosv5") || self.0.contains("LocalCachedUser")
    }
}

/// Ordered `AuthenticationAuthority` values of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationAuthorityList {
    entries: Vec<AuthorityEntry>,
}

impl AuthenticationAuthorityList {
    pub fn from_values(values: &[String]) -> Self {
        Self {
            entries: values
                .iter()
                .filter(|v| !v.trim().is_empty())
                .map(|v| AuthorityEntry::new(v.trim()))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[AuthorityEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shadow_hash(&self) -> Option<&AuthorityEntry> {
        self.entries
            .iter()
            .find(|e| e.kind() == AuthorityKind::ShadowHash)
    }

    pub fn removable(&self) -> Vec<&AuthorityEntry> {
        self.entries.iter().filter(|e| e.is_removable()).collect()
    }

    pub fn has_active_directory_marker(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.as_str().contains(ACTIVE_DIRECTORY_MARKER))
    }
}

/// One operating-system user as seen at classification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub username: String,
    pub uid: u32,
    pub home: Option<PathBuf>,
    pub primary_gid: u32,
    pub groups: Vec<String>,
    pub is_admin: bool,
    pub ad_bound: bool,
}

impl AccountRecord {
    /// Both detection strategies are equivalent: a non-empty SMBSID or an
    /// AD-marked authority entry.
    pub fn detect_ad_binding(record: &UserRecord) -> bool {
        record.has_value(ATTR_SMBSID) || record.authentication_authority().has_active_directory_marker()
    }
}
