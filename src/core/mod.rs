//! Shared primitives: records, configuration, the backup store, host
//! adapters and small helpers used by every phase.

pub mod audit;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod macos;
pub mod output;
pub mod poll;
pub mod record;
pub mod shell;
pub mod store;
pub mod time;
