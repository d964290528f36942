//! RowSync CLI
//!
//! Command-line tools for RowSync-tracked SQLite databases.
//!
//! # Commands
//!
//! - `provision` - Create tracking tables and triggers for a scope
//! - `deprovision` - Remove a scope's tracking infrastructure
//! - `changes` - Export the changes of a scope into a batch
//! - `inspect` - Display a batch manifest
//! - `sync` - Run one sync cycle against a server

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RowSync command-line tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database
    #[arg(global = true, short, long)]
    db: Option<PathBuf>,

    /// Scope name
    #[arg(global = true, short, long, default_value = "default")]
    scope: String,

    /// Scope-info table name
    #[arg(global = true, long, default_value = rowsync_provider::DEFAULT_SCOPE_INFO_TABLE)]
    scope_table: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tracking tables and triggers for a scope
    Provision {
        /// Tables to track, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        tables: Vec<String>,
    },

    /// Remove a scope's tracking tables, triggers and scope row
    Deprovision,

    /// Export the changes of a scope into a batch directory
    Changes {
        /// Root directory of the batch
        #[arg(short, long)]
        out: PathBuf,

        /// Lower bound; defaults to the scope's last sync
        #[arg(long)]
        since: Option<i64>,

        /// Maximum rows per part (0 = unbounded)
        #[arg(short, long, default_value_t = rowsync_engine::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Display a batch manifest
    Inspect {
        /// Batch directory or manifest file
        batch: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one sync cycle against a server
    Sync {
        /// Service URI
        #[arg(short, long)]
        url: String,

        /// Tables to sync, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        tables: Vec<String>,

        /// Root directory of batches
        #[arg(long)]
        batches: Option<PathBuf>,

        /// Maximum rows per part (0 = unbounded)
        #[arg(short, long, default_value_t = rowsync_engine::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let target = commands::Target {
        scope: cli.scope,
        scope_table: cli.scope_table,
    };

    match cli.command {
        Commands::Provision { tables } => {
            let db = cli.db.ok_or("Database path required for provision")?;
            commands::provision::run(&db, &target, &tables)?;
        }
        Commands::Deprovision => {
            let db = cli.db.ok_or("Database path required for deprovision")?;
            commands::deprovision::run(&db, &target)?;
        }
        Commands::Changes {
            out,
            since,
            batch_size,
        } => {
            let db = cli.db.ok_or("Database path required for changes")?;
            commands::changes::run(&db, &target, &out, since, batch_size)?;
        }
        Commands::Inspect { batch, format } => {
            commands::inspect::run(&batch, &format)?;
        }
        Commands::Sync {
            url,
            tables,
            batches,
            batch_size,
        } => {
            let db = cli.db.ok_or("Database path required for sync")?;
            commands::sync::run(&db, &target, &url, &tables, batches, batch_size)?;
        }
        Commands::Version => {
            println!("RowSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("RowSync protocol v{}", rowsync_engine::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
