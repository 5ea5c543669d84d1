//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// beansd - autonomous execution daemon for the beans backlog
#[derive(Parser)]
#[command(
    name = "bd",
    about = "Runs backlog items as isolated, git-tracked agent sessions",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/beansd/logs/beansd.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon in the background
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon gracefully
    Stop,

    /// Show daemon status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the todo queue in dispatch order
    Queue,

    /// Show stuck items awaiting an operator
    Stuck,

    /// Cancel an in-flight item (reverts it to todo)
    Cancel {
        /// Item id
        id: String,
    },

    /// Internal: run as the daemon process (used by `start`)
    #[command(hide = true)]
    RunDaemon,
}

/// Output format for status commands
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
