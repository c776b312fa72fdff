use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Named locks and issue-state tooling for analysis runs.
#[derive(Debug, Parser)]
#[command(name = "reckon", version, about)]
pub struct Cli {
    /// Database file; overrides RECKON_DATABASE_PATH.
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds; overrides RECKON_BUSY_TIMEOUT_MS.
    #[arg(long, global = true, value_name = "MS")]
    pub busy_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire, release or inspect a named lock.
    #[command(subcommand)]
    Lock(LockCommand),

    /// Work with issue snapshots.
    #[command(subcommand)]
    Issues(IssuesCommand),
}

#[derive(Debug, Subcommand)]
pub enum LockCommand {
    /// Try to take a lock. Exits with status 3 when someone else holds it.
    Acquire(AcquireArgs),

    /// Release a lock. Unknown names are ignored.
    Release { name: String },

    /// Print the stored row for a lock, or null.
    Show { name: String },
}

#[derive(Debug, Args)]
pub struct AcquireArgs {
    pub name: String,

    /// Reclaim the lock when the current hold is at least this old.
    /// 0 always reclaims. Without it an existing hold is never reclaimed.
    #[arg(long, value_name = "SECS")]
    pub max_duration: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum IssuesCommand {
    /// Load a JSON snapshot `{"issues": [...], "changelog": [...]}` and
    /// report issue counts per component.
    Load {
        file: PathBuf,

        /// Rows per page when scanning; overrides RECKON_SCAN_PAGE_SIZE.
        #[arg(long, value_name = "ROWS")]
        page_size: Option<usize>,
    },
}
