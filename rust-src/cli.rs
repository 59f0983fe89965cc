//! CLI definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::commands;
use crate::config::{get_db_path, DEFAULT_WINDOW_DAYS, REFRESH_GRACE};


/// Token Tracker - local cache and aggregation for LLM API usage
#[derive(Parser)]
#[command(name = "ttk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the usage database
    #[arg(long, global = true, env = "TOKEN_TRACKER_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}


#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON array of usage snapshots
    Ingest {
        /// Input file (reads stdin when omitted or '-')
        file: Option<PathBuf>,
    },

    /// Show daily and per-model totals for a window
    Usage {
        /// Window size in days
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_DAYS)]
        days: u32,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Show database statistics
    Status,

    /// Track usage from inbound events on stdin
    Watch {
        /// Window size in days
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_DAYS)]
        days: u32,

        /// Command that runs one poll cycle and prints events to stdout
        #[arg(long, env = "TOKEN_TRACKER_POLLER")]
        poller: Option<String>,

        /// How long a refresh waits for the poller's data (milliseconds)
        #[arg(long, default_value_t = REFRESH_GRACE.as_millis() as u64)]
        grace_ms: u64,
    },

    /// Run the poller once and print refreshed totals
    Refresh {
        /// Window size in days
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_DAYS)]
        days: u32,

        /// Command that runs one poll cycle and prints events to stdout
        #[arg(long, env = "TOKEN_TRACKER_POLLER")]
        poller: Option<String>,

        /// How long a refresh waits for the poller's data (milliseconds)
        #[arg(long, default_value_t = REFRESH_GRACE.as_millis() as u64)]
        grace_ms: u64,
    },
}


#[derive(Subcommand)]
enum SettingsCommands {
    /// Print all settings (API keys masked)
    Show,

    /// Print one stored setting
    Get {
        key: String,
    },

    /// Save one or more settings
    Set {
        /// KEY=VALUE pairs
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}


/// Run the CLI
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let db_path = match cli.db {
        Some(path) => path,
        None => get_db_path(),
    };

    match cli.command {
        Some(Commands::Ingest { file }) => commands::ingest::run(&db_path, file).await?,
        Some(Commands::Usage { days, json }) => commands::usage::run(&db_path, days, json).await?,
        Some(Commands::Settings { command }) => match command {
            SettingsCommands::Show => commands::settings::show(&db_path).await?,
            SettingsCommands::Get { key } => commands::settings::get(&db_path, &key).await?,
            SettingsCommands::Set { pairs } => commands::settings::set(&db_path, &pairs).await?,
        },
        Some(Commands::Status) => commands::status::run(&db_path).await?,
        Some(Commands::Watch { days, poller, grace_ms }) => {
            let grace = Duration::from_millis(grace_ms);
            commands::watch::run(&db_path, days, poller.as_deref(), grace).await?
        }
        Some(Commands::Refresh { days, poller, grace_ms }) => {
            let grace = Duration::from_millis(grace_ms);
            commands::refresh::run(&db_path, days, poller.as_deref(), grace).await?
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
        }
    }

    Ok(())
}
