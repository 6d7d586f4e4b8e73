//! Host adapter backed by the macOS directory-service tools.

use crate::core::directory::{DaemonControl, DirectoryService, HomeFolders, Session, UnbindCredentials};
use crate::core::error::ConvertError;
use crate::core::record::UserRecord;
use crate::core::shell::{ToolOutput, display_command, run_tool, run_tool_logged_as};
use std::collections::BTreeMap;
use std::path::Path;

pub const DSCL: &str = "/usr/bin/dscl";
pub const DSEDITGROUP: &str = "/usr/sbin/dseditgroup";
pub const DSCONFIGAD: &str = "/usr/sbin/dsconfigad";
pub const ID: &str = "/usr/bin/id";
pub const CHOWN: &str = "/usr/sbin/chown";
pub const LS: &str = "/bin/ls";
pub const PGREP: &str = "/usr/bin/pgrep";
pub const KILLALL: &str = "/usr/bin/killall";
pub const STAT: &str = "/usr/bin/stat";

pub const DIRECTORY_DAEMON: &str = "opendirectoryd";

/// Tools every subcommand may call; checked by `doctor`.
pub const REQUIRED_TOOLS: &[&str] = &[DSCL, DSEDITGROUP, DSCONFIGAD, ID, CHOWN, LS, PGREP, KILLALL, STAT];

const RECORD_NOT_FOUND: &[&str] = &["eDSRecordNotFound", "-14136"];
const ATTRIBUTE_NOT_FOUND: &[&str] = &["eDSAttributeNotFound", "-14134", "No such key"];
const NO_CONSOLE_USER: &[&str] = &["", "root", "loginwindow", "_mbsetupuser"];

#[derive(Debug, Default, Clone, Copy)]
pub struct MacHost;

impl MacHost {
    pub fn new() -> Self {
        Self
    }

    fn dscl(&self, args: &[&str]) -> Result<ToolOutput, ConvertError> {
        run_tool(DSCL, args)
            .map_err(|e| ConvertError::DirectoryUnavailable(format!("cannot run dscl: {}", e)))
    }

    fn dscl_delete(&self, args: &[&str]) -> Result<(), ConvertError> {
        let out = self.dscl(args)?;
        if out.success() || mentions(&out, ATTRIBUTE_NOT_FOUND) {
            return Ok(());
        }
        out.into_checked(&display_command(DSCL, args)).map(|_| ())
    }

    fn dseditgroup(&self, args: &[&str]) -> Result<ToolOutput, ConvertError> {
        run_tool(DSEDITGROUP, args).map_err(|e| {
            ConvertError::DirectoryUnavailable(format!("cannot run dseditgroup: {}", e))
        })
    }
}

fn mentions(out: &ToolOutput, needles: &[&str]) -> bool {
    needles
        .iter()
        .any(|n| out.stderr.contains(n) || out.stdout.contains(n))
}

fn user_path(username: &str) -> String {
    format!("/Users/{}", username)
}

impl DirectoryService for MacHost {
    fn read_user(&self, username: &str) -> Result<Option<UserRecord>, ConvertError> {
        let path = user_path(username);
        let out = self.dscl(&[".", "-read", &path])?;
        if out.success() {
            return Ok(Some(UserRecord::parse(&out.stdout)));
        }
        if mentions(&out, RECORD_NOT_FOUND) {
            return Ok(None);
        }
        Err(ConvertError::DirectoryUnavailable(format!(
            "dscl read of {} failed (exit {}): {}",
            path,
            out.code,
            out.stderr_preview()
        )))
    }

    fn delete_attribute(&self, username: &str, attribute: &str) -> Result<(), ConvertError> {
        self.dscl_delete(&[".", "-delete", &user_path(username), attribute])
    }

    fn delete_attribute_value(
        &self,
        username: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), ConvertError> {
        self.dscl_delete(&[".", "-delete", &user_path(username), attribute, value])
    }

    fn set_attribute(
        &self,
        username: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), ConvertError> {
        let path = user_path(username);
        let args = [".", "-create", path.as_str(), attribute, value];
        self.dscl(&args)?
            .into_checked(&display_command(DSCL, &args))
            .map(|_| ())
    }

    fn list_users(&self) -> Result<Vec<(String, u32)>, ConvertError> {
        let out = self.dscl(&[".", "-list", "/Users", "UniqueID"])?;
        if !out.success() {
            return Err(ConvertError::DirectoryUnavailable(format!(
                "dscl list failed: {}",
                out.stderr_preview()
            )));
        }
        Ok(parse_user_list(&out.stdout))
    }

    fn user_groups(&self, username: &str) -> Result<Vec<String>, ConvertError> {
        // Group names may contain spaces; resolve ids through the GID table.
        let out = run_tool(ID, &["-G", username])
            .map_err(|e| ConvertError::DirectoryUnavailable(format!("cannot run id: {}", e)))?;
        if !out.success() {
            if out.stderr.contains("no such user") {
                return Err(ConvertError::UserNotFound(username.to_string()));
            }
            return Err(ConvertError::DirectoryUnavailable(format!(
                "id -G {} failed: {}",
                username,
                out.stderr_preview()
            )));
        }
        let gids = parse_gid_list(&out.stdout);

        let table = self.dscl(&[".", "-list", "/Groups", "PrimaryGroupID"])?;
        if !table.success() {
            return Err(ConvertError::DirectoryUnavailable(format!(
                "dscl group list failed: {}",
                table.stderr_preview()
            )));
        }
        Ok(resolve_group_names(&gids, &parse_group_table(&table.stdout)))
    }

    fn is_member(&self, username: &str, group: &str) -> Result<bool, ConvertError> {
        let args = ["-o", "checkmember", "-m", username, group];
        let out = self.dseditgroup(&args)?;
        parse_checkmember(&out.stdout).ok_or_else(|| ConvertError::CommandFailed {
            command: display_command(DSEDITGROUP, &args),
            code: out.code,
            stderr: out.stderr_preview(),
        })
    }

    fn add_to_group(&self, username: &str, group: &str) -> Result<(), ConvertError> {
        let args = ["-o", "edit", "-a", username, "-t", "user", group];
        self.dseditgroup(&args)?
            .into_checked(&display_command(DSEDITGROUP, &args))
            .map(|_| ())
    }

    fn remove_from_group(&self, username: &str, group: &str) -> Result<(), ConvertError> {
        let args = ["-o", "edit", "-d", username, "-t", "user", group];
        self.dseditgroup(&args)?
            .into_checked(&display_command(DSEDITGROUP, &args))
            .map(|_| ())
    }

    fn bound_domain(&self) -> Result<Option<String>, ConvertError> {
        let out = run_tool(DSCONFIGAD, &["-show"]).map_err(|e| {
            ConvertError::DirectoryUnavailable(format!("cannot run dsconfigad: {}", e))
        })?;
        Ok(parse_bound_domain(&out.stdout))
    }

    fn unbind(&self, credentials: &UnbindCredentials) -> Result<(), ConvertError> {
        let shown = format!("-remove -force -u {} -p ********", credentials.user);
        let out = run_tool_logged_as(
            DSCONFIGAD,
            &[
                "-remove",
                "-force",
                "-u",
                credentials.user.as_str(),
                "-p",
                credentials.password.as_str(),
            ],
            &shown,
        )
        .map_err(|e| ConvertError::UnbindFailed(e.to_string()))?;
        if out.success() {
            Ok(())
        } else {
            Err(ConvertError::UnbindFailed(format!(
                "dsconfigad -remove exited {}: {}",
                out.code,
                out.stderr_preview()
            )))
        }
    }
}

impl DaemonControl for MacHost {
    fn restart(&self) -> Result<(), ConvertError> {
        let out = run_tool(KILLALL, &[DIRECTORY_DAEMON]).map_err(|e| {
            ConvertError::DirectoryUnavailable(format!("cannot run killall: {}", e))
        })?;
        // Not running at all is fine; launchd starts it on demand.
        if out.success() || out.stderr.contains("No matching processes") {
            Ok(())
        } else {
            out.into_checked(&display_command(KILLALL, &[DIRECTORY_DAEMON]))
                .map(|_| ())
        }
    }

    fn is_running(&self) -> bool {
        run_tool(PGREP, &["-x", DIRECTORY_DAEMON]).is_ok_and(|o| o.success())
    }

    fn is_responsive(&self) -> bool {
        run_tool(DSCL, &[".", "-read", "/Users/root", "RecordName"]).is_ok_and(|o| o.success())
    }
}

impl HomeFolders for MacHost {
    fn acl_listing(&self, home: &Path) -> Result<String, ConvertError> {
        let home_arg = home.to_string_lossy();
        let args = ["-le", &*home_arg];
        let out = run_tool(LS, &args)?.into_checked(&display_command(LS, &args))?;
        Ok(out.stdout)
    }

    fn set_owner_recursive(&self, home: &Path, uid: u32, gid: u32) -> Result<(), ConvertError> {
        let owner = format!("{}:{}", uid, gid);
        let home_arg = home.to_string_lossy();
        let args = ["-R", owner.as_str(), &*home_arg];
        run_tool(CHOWN, &args)?
            .into_checked(&display_command(CHOWN, &args))
            .map(|_| ())
    }
}

impl Session for MacHost {
    fn console_user(&self) -> Result<Option<String>, ConvertError> {
        let args = ["-f", "%Su", "/dev/console"];
        let out = run_tool(STAT, &args)?.into_checked(&display_command(STAT, &args))?;
        Ok(interpret_console_owner(&out.stdout))
    }
}

/// Split a `dscl . -list` line into the record name and its trailing
/// numeric value. The name may itself contain spaces.
fn split_name_and_id(line: &str) -> Option<(String, u32)> {
    let (name, id) = line.trim_end().rsplit_once(char::is_whitespace)?;
    let id = id.parse::<u32>().ok()?;
    let name = name.trim();
    (!name.is_empty()).then(|| (name.to_string(), id))
}

/// `dscl . -list /Users UniqueID` lines: name, whitespace, uid. Negative
/// UIDs (nobody) are skipped.
pub fn parse_user_list(stdout: &str) -> Vec<(String, u32)> {
    stdout.lines().filter_map(split_name_and_id).collect()
}

/// `dscl . -list /Groups PrimaryGroupID` as a GID to name map. The first
/// record listed for a GID wins.
pub fn parse_group_table(stdout: &str) -> BTreeMap<u32, String> {
    let mut table = BTreeMap::new();
    for (name, gid) in stdout.lines().filter_map(split_name_and_id) {
        table.entry(gid).or_insert(name);
    }
    table
}

/// Numeric GIDs printed by `id -G`.
pub fn parse_gid_list(stdout: &str) -> Vec<u32> {
    stdout
        .split_whitespace()
        .filter_map(|g| g.parse().ok())
        .collect()
}

/// Names for `gids`. A GID with no local group record (an AD group) is
/// kept as its number.
pub fn resolve_group_names(gids: &[u32], table: &BTreeMap<u32, String>) -> Vec<String> {
    gids.iter()
        .map(|gid| table.get(gid).cloned().unwrap_or_else(|| gid.to_string()))
        .collect()
}

/// `dseditgroup -o checkmember` answers "yes ..." or "no ...".
pub fn parse_checkmember(stdout: &str) -> Option<bool> {
    let first = stdout.split_whitespace().next()?;
    match first {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

/// Domain from the `Active Directory Domain = ...` line of `dsconfigad -show`.
pub fn parse_bound_domain(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() != "Active Directory Domain" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

pub fn interpret_console_owner(stdout: &str) -> Option<String> {
    let owner = stdout.trim();
    if NO_CONSOLE_USER.contains(&owner) {
        None
    } else {
        Some(owner.to_string())
    }
}
