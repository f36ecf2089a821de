//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::GpsTime;

/// LiveTrig - streaming trigger search coordinator
#[derive(Parser)]
#[command(
    name = "lt",
    about = "Cycle coordinator for a multi-detector streaming trigger search",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/livetrig/logs/livetrig.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pool over the configured span with synthetic collaborators
    Run {
        /// GPS start time (overrides config)
        #[arg(short, long)]
        start: Option<GpsTime>,

        /// GPS stop time (overrides config)
        #[arg(short, long)]
        end: Option<GpsTime>,

        /// Number of processes, coordinator included (overrides config)
        #[arg(short, long)]
        pool_size: Option<usize>,
    },

    /// Show the template shard of each worker
    Shard {
        /// Number of templates in the bank
        #[arg(short, long)]
        bank_size: usize,

        /// Number of processes, coordinator included
        #[arg(short, long)]
        pool_size: usize,

        /// Only show this worker's shard
        #[arg(short, long)]
        rank: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}
