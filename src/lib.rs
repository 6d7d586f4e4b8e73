//! mobileconv: turn Active Directory mobile accounts into local accounts.
//!
//! Intended to run as root from a management policy on macOS. For each
//! target user the conversion runs four phases strictly in order:
//!
//! - **Classify**: AD-bound if `SMBSID` is set or an `AuthenticationAuthority`
//!   entry points at an Active Directory node
//! - **Snapshot**: groups, admin membership and a home ACL listing are
//!   written to the backup root before anything changes
//! - **Strip**: AD attributes are deleted and Kerberos / cached-user
//!   authorities removed value by value; the ShadowHash entry is never
//!   touched. The directory daemon is then restarted and polled until it
//!   answers again
//! - **Reconcile**: primary group, home ownership, staff membership,
//!   restored local groups, then the admin policy
//!
//! # Examples
//!
//! ```bash
//! # Check the machine first
//! mobileconv doctor
//!
//! # Convert one user, demoting them if they were an AD admin
//! mobileconv convert jdoe --admin-policy demote-if-ad
//!
//! # Convert every mobile account, then leave the domain
//! mobileconv convert --all --unbind
//!
//! # Demote whoever is at the console
//! mobileconv admin demote
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: records, config, backup store, host adapters, shared helpers
//! - [`plugins`]: the conversion phases and the commands built on them

pub mod core;
pub mod plugins;

use crate::core::{
    audit::AuditLog,
    config::{AdminPolicy, Config},
    context::ConversionContext,
    directory::{DirectoryService, Host, Session},
    error::ConvertError,
    macos::MacHost,
    output, time,
    store::BackupStore,
};
use crate::plugins::{
    admin::{self, AdminOutcome},
    classifier,
    converter::{self, BatchReport, ConversionReport, Selection},
    doctor,
};

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "MOBILECONV_LOG";

#[derive(Parser, Debug)]
#[clap(
    name = "mobileconv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Convert Active Directory mobile accounts to local accounts"
)]
struct Cli {
    /// TOML config file (defaults to the system location when present).
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// Override the backup root directory.
    #[clap(long, global = true)]
    backup_root: Option<PathBuf>,
    /// Debug-level logging.
    #[clap(short, long, global = true)]
    verbose: bool,
    /// Emit log lines as JSON.
    #[clap(long, global = true)]
    log_json: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert mobile accounts to local accounts
    Convert(ConvertCli),
    /// Report whether an account is AD-bound
    Classify(ClassifyCli),
    /// Inspect saved permission snapshots
    Snapshot(SnapshotCli),
    /// Promote or demote the console user
    Admin(AdminCli),
    /// Preflight checks
    Doctor(doctor::DoctorCli),
    /// Print the version
    Version,
}

#[derive(clap::Args, Debug)]
struct ConvertCli {
    /// Users to convert, processed in the order given.
    users: Vec<String>,
    /// Convert every account at or above the configured minimum UID.
    #[clap(long, conflicts_with = "users")]
    all: bool,
    /// Admin membership policy for converted accounts.
    #[clap(long, value_enum)]
    admin_policy: Option<AdminPolicy>,
    /// Unbind from Active Directory once every conversion succeeded.
    #[clap(long)]
    unbind: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    format: String,
}

#[derive(clap::Args, Debug)]
struct ClassifyCli {
    user: String,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    format: String,
}

#[derive(clap::Args, Debug)]
struct SnapshotCli {
    #[clap(subcommand)]
    command: SnapshotCommand,
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Show the saved snapshot for a user
    Show {
        user: String,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
struct AdminCli {
    #[clap(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Add the user to the admin group
    Promote {
        /// Target user (defaults to the console user).
        #[clap(long)]
        user: Option<String>,
    },
    /// Remove the user from the admin group
    Demote {
        /// Target user (defaults to the console user).
        #[clap(long)]
        user: Option<String>,
    },
    /// Show admin membership
    Status {
        /// Target user (defaults to the console user).
        #[clap(long)]
        user: Option<String>,
    },
}

pub fn run() -> Result<(), ConvertError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }
        Err(e) => return Err(ConvertError::ValidationError(e.to_string())),
    };

    init_tracing(cli.verbose, cli.log_json);

    if let Command::Version = cli.command {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.backup_root {
        config.backup_root = root;
    }
    let host = MacHost::new();

    match cli.command {
        Command::Version => Ok(()),
        Command::Convert(convert_cli) => run_convert(&host, config, convert_cli),
        Command::Classify(classify_cli) => run_classify(&host, classify_cli),
        Command::Snapshot(snapshot_cli) => run_snapshot(&config, snapshot_cli),
        Command::Admin(admin_cli) => run_admin(&host, &host, admin_cli),
        Command::Doctor(doctor_cli) => {
            doctor::run_doctor_cli(&config, cli.config.as_deref(), &host, &host, doctor_cli)
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose {
        "mobileconv=debug"
    } else {
        "mobileconv=info"
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Warning: logging init failed: {}", e);
    }
}

fn run_convert(host: &MacHost, mut config: Config, cli: ConvertCli) -> Result<(), ConvertError> {
    if let Some(policy) = cli.admin_policy {
        config.admin_policy = policy;
    }

    let (usernames, selection) = if cli.all {
        (
            converter::candidate_users(host, config.min_uid)?,
            Selection::Discovered,
        )
    } else if cli.users.is_empty() {
        return Err(ConvertError::ValidationError(
            "name at least one user or pass --all".to_string(),
        ));
    } else {
        (cli.users, Selection::Named)
    };

    let store = BackupStore::new(&config.backup_root);
    let audit = AuditLog::new(&store.root);
    let ctx = ConversionContext::new(
        Host {
            directory: host,
            daemon: host,
            homes: host,
        },
        &store,
        &audit,
        &config,
    );
    tracing::info!(
        run_id = audit.run_id(),
        users = usernames.len(),
        policy = %config.admin_policy,
        "starting conversion"
    );

    let mut batch = converter::convert_many(&ctx, &usernames, selection);
    render_batch(&batch, &cli.format)?;

    if let Some(err) = batch.abort_error.take() {
        if let Some(user) = &batch.aborted_at {
            tracing::error!(user = %user, "batch stopped early");
        }
        return Err(err);
    }
    if !batch.succeeded() {
        if cli.unbind {
            tracing::warn!("skipping unbind: not every account converted");
        }
        return Err(ConvertError::ValidationError(format!(
            "{} of {} conversion(s) failed",
            batch.failures.len(),
            usernames.len()
        )));
    }

    if cli.unbind {
        let credentials = config.unbind.credentials();
        match converter::unbind_if_bound(host, &credentials)? {
            Some(domain) => println!("Unbound from {}", domain),
            None => println!("Not bound to Active Directory"),
        }
    }
    Ok(())
}

fn render_batch(batch: &BatchReport, format: &str) -> Result<(), ConvertError> {
    if format == "json" {
        let status = if batch.succeeded() { "ok" } else { "error" };
        let envelope = time::command_envelope("convert", status, serde_json::to_value(batch)?);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    for report in &batch.converted {
        println!("{} {}", "✓".bright_green(), describe_conversion(report));
        let warnings = report.all_warnings();
        if !warnings.is_empty() {
            println!(
                "    {} {}",
                "warnings:".yellow(),
                output::summarize_warnings(&warnings, 3, 120)
            );
        }
    }
    for failure in &batch.failures {
        println!(
            "{} {}: {}",
            "✗".bright_red(),
            failure.username,
            output::compact_line(&failure.error, 200)
        );
    }
    Ok(())
}

fn describe_conversion(report: &ConversionReport) -> String {
    if !report.ad_bound {
        return format!("{}: local account, admin {}", report.username, report.admin);
    }
    let restored = report
        .reconcile
        .as_ref()
        .map(|r| r.restored.len())
        .unwrap_or_default();
    format!(
        "{}: converted{}, {} group(s) restored, admin {}",
        report.username,
        if report.resumed { " (resumed)" } else { "" },
        restored,
        report.admin
    )
}

fn run_classify(directory: &dyn DirectoryService, cli: ClassifyCli) -> Result<(), ConvertError> {
    let classification = classifier::classify(directory, &cli.user)?;
    let summary = classification.summary();
    if cli.format == "json" {
        let envelope =
            time::command_envelope("classify", "ok", serde_json::to_value(&summary)?);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        let kind = if summary.ad_bound {
            "AD mobile account".yellow().to_string()
        } else {
            "local account".green().to_string()
        };
        println!("{} (uid {}): {}", summary.username, summary.uid, kind);
        println!("  admin:  {}", summary.is_admin);
        println!("  groups: {}", summary.groups.join(", "));
    }
    Ok(())
}

fn run_snapshot(config: &Config, cli: SnapshotCli) -> Result<(), ConvertError> {
    let store = BackupStore::new(&config.backup_root);
    match cli.command {
        SnapshotCommand::Show { user, format } => {
            let Some((snapshot, manifest)) = store.load(&user)? else {
                println!("No snapshot for {}", user);
                return Ok(());
            };
            if format == "json" {
                let envelope = time::command_envelope(
                    "snapshot.show",
                    "ok",
                    serde_json::json!({
                        "user": snapshot.username,
                        "groups": snapshot.groups,
                        "had_admin": snapshot.had_admin,
                        "home_acl": snapshot.home_acl,
                        "manifest": manifest,
                    }),
                );
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            } else {
                println!("{} (run {}, {:?})", snapshot.username, manifest.run_id, manifest.state);
                println!("  had admin: {}", snapshot.had_admin);
                println!("  groups:    {}", snapshot.groups.join(", "));
                if let Some(acl) = &snapshot.home_acl {
                    println!("  home ACL:\n{}", acl);
                }
            }
            Ok(())
        }
    }
}

fn run_admin(
    directory: &dyn DirectoryService,
    session: &dyn Session,
    cli: AdminCli,
) -> Result<(), ConvertError> {
    let (requested, action) = match cli.command {
        AdminCommand::Promote { user } => (user, "promote"),
        AdminCommand::Demote { user } => (user, "demote"),
        AdminCommand::Status { user } => (user, "status"),
    };
    let Some(username) = resolve_target_user(session, requested)? else {
        tracing::info!("no user at the console; nothing to do");
        println!("No console user logged in");
        return Ok(());
    };

    let outcome = match action {
        "promote" => admin::promote(directory, &username)?,
        "demote" => admin::demote(directory, &username)?,
        _ => {
            if directory.is_member(&username, crate::core::record::ADMIN_GROUP)? {
                AdminOutcome::AlreadyAdmin
            } else {
                AdminOutcome::NotAdmin
            }
        }
    };
    println!("{}: {}", username, outcome);
    Ok(())
}

/// Explicit user wins; otherwise whoever owns the console.
pub fn resolve_target_user(
    session: &dyn Session,
    requested: Option<String>,
) -> Result<Option<String>, ConvertError> {
    match requested {
        Some(user) if !user.trim().is_empty() => Ok(Some(user)),
        _ => session.console_user(),
    }
}
