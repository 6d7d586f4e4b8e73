//! Doctor: read-only preflight checks before converting accounts.
//!
//! - Root privileges
//! - Required directory-service tools present
//! - Directory daemon running and answering
//! - Backup root writable
//! - Config file parses
//! - Active Directory binding status

use crate::core::config::{Config, DEFAULT_CONFIG_PATH};
use crate::core::directory::{DaemonControl, DirectoryService};
use crate::core::error::ConvertError;
use crate::core::macos::{ID, REQUIRED_TOOLS};
use crate::core::shell::run_tool;
use clap::Args;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Args, Debug)]
pub struct DoctorCli {
    /// Output format: 'text' or 'json'
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
}

pub fn run_doctor_cli(
    config: &Config,
    config_path: Option<&Path>,
    directory: &dyn DirectoryService,
    daemon: &dyn DaemonControl,
    cli: DoctorCli,
) -> Result<(), ConvertError> {
    let report = run_preflight_checks(config, config_path, directory, daemon);

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("mobileconv doctor: preflight checks\n");
        for check in &report.checks {
            let icon = match check.status {
                CheckStatus::Pass => "PASS",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Warn => "WARN",
            };
            println!("  [{}] {}: {}", icon, check.name, check.message);
        }
        println!(
            "\nSummary: {} passed, {} failed, {} warnings",
            report.passed, report.failed, report.warnings
        );
    }

    if report.failed > 0 {
        return Err(ConvertError::ValidationError(format!(
            "Doctor: {} check(s) failed",
            report.failed
        )));
    }
    Ok(())
}

pub fn run_preflight_checks(
    config: &Config,
    config_path: Option<&Path>,
    directory: &dyn DirectoryService,
    daemon: &dyn DaemonControl,
) -> DoctorReport {
    let mut checks = vec![check_privileges()];
    checks.extend(check_tools(REQUIRED_TOOLS));
    checks.push(check_daemon(daemon));
    checks.push(check_backup_root(&config.backup_root));
    checks.push(check_config_file(
        config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH)),
    ));
    checks.push(check_binding(directory));
    summarize(checks)
}

fn summarize(checks: Vec<CheckResult>) -> DoctorReport {
    let count = |s: CheckStatus| checks.iter().filter(|c| c.status == s).count();
    let passed = count(CheckStatus::Pass);
    let failed = count(CheckStatus::Fail);
    let warnings = count(CheckStatus::Warn);
    DoctorReport {
        checks,
        passed,
        failed,
        warnings,
    }
}

fn check_privileges() -> CheckResult {
    let name = "Privileges".to_string();
    match run_tool(ID, &["-u"]) {
        Ok(o) if o.success() && o.stdout.trim() == "0" => CheckResult {
            name,
            status: CheckStatus::Pass,
            message: "Running as root".to_string(),
        },
        Ok(o) if o.success() => CheckResult {
            name,
            status: CheckStatus::Fail,
            message: format!("Running as uid {}; conversion needs root", o.stdout.trim()),
        },
        Ok(o) => CheckResult {
            name,
            status: CheckStatus::Fail,
            message: format!("id -u failed: {}", o.stderr_preview()),
        },
        Err(e) => CheckResult {
            name,
            status: CheckStatus::Fail,
            message: format!("id not available: {}", e),
        },
    }
}

fn check_tools(tools: &[&str]) -> Vec<CheckResult> {
    tools
        .iter()
        .map(|tool| {
            if Path::new(tool).is_file() {
                CheckResult {
                    name: format!("Tool: {}", tool),
                    status: CheckStatus::Pass,
                    message: "Present".to_string(),
                }
            } else {
                CheckResult {
                    name: format!("Tool: {}", tool),
                    status: CheckStatus::Fail,
                    message: "Missing (required)".to_string(),
                }
            }
        })
        .collect()
}

fn check_daemon(daemon: &dyn DaemonControl) -> CheckResult {
    let name = "Directory daemon".to_string();
    if !daemon.is_running() {
        return CheckResult {
            name,
            status: CheckStatus::Fail,
            message: "opendirectoryd is not running".to_string(),
        };
    }
    if daemon.is_responsive() {
        CheckResult {
            name,
            status: CheckStatus::Pass,
            message: "Running and answering reads".to_string(),
        }
    } else {
        CheckResult {
            name,
            status: CheckStatus::Fail,
            message: "Running but not answering reads".to_string(),
        }
    }
}

fn check_backup_root(root: &Path) -> CheckResult {
    let name = "Backup root".to_string();
    if let Err(e) = fs::create_dir_all(root) {
        return CheckResult {
            name,
            status: CheckStatus::Fail,
            message: format!("Cannot create {}: {}", root.display(), e),
        };
    }
    let probe = root.join(".doctor-probe");
    match fs::write(&probe, b"ok").and_then(|_| fs::remove_file(&probe)) {
        Ok(()) => CheckResult {
            name,
            status: CheckStatus::Pass,
            message: format!("{} is writable", root.display()),
        },
        Err(e) => CheckResult {
            name,
            status: CheckStatus::Fail,
            message: format!("{} is not writable: {}", root.display(), e),
        },
    }
}

fn check_config_file(path: &Path) -> CheckResult {
    if !path.is_file() {
        return CheckResult {
            name: "Config".to_string(),
            status: CheckStatus::Pass,
            message: "No config file (using defaults)".to_string(),
        };
    }
    match fs::read_to_string(path) {
        Ok(content) => match content.parse::<toml::Table>() {
            Ok(_) => CheckResult {
                name: "Config".to_string(),
                status: CheckStatus::Pass,
                message: format!("{} is valid TOML", path.display()),
            },
            Err(e) => CheckResult {
                name: "Config".to_string(),
                status: CheckStatus::Fail,
                message: format!("Invalid TOML: {}", e),
            },
        },
        Err(e) => CheckResult {
            name: "Config".to_string(),
            status: CheckStatus::Fail,
            message: format!("Cannot read config: {}", e),
        },
    }
}

fn check_binding(directory: &dyn DirectoryService) -> CheckResult {
    let name = "AD binding".to_string();
    match directory.bound_domain() {
        Ok(Some(domain)) => CheckResult {
            name,
            status: CheckStatus::Pass,
            message: format!("Bound to {}", domain),
        },
        Ok(None) => CheckResult {
            name,
            status: CheckStatus::Warn,
            message: "Not bound; --unbind will be a no-op".to_string(),
        },
        Err(e) => CheckResult {
            name,
            status: CheckStatus::Warn,
            message: format!("Binding status unknown: {}", e),
        },
    }
}
