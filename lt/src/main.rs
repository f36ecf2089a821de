//! LiveTrig - streaming trigger search coordinator
//!
//! CLI entry point for running the pool and inspecting its setup.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use livetrig::cli::{Cli, Command};
use livetrig::config::Config;
use livetrig::domain::{COORDINATOR_RANK, GpsTime};
use livetrig::launch::{RunSummary, run_pool};
use livetrig::shard::{ShardError, TemplateShard};
use livetrig::sim::SimFactory;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("livetrig")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("livetrig.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run { start, end, pool_size }) => cmd_run(config, start, end, pool_size).await,
        Some(Command::Shard {
            bank_size,
            pool_size,
            rank,
        }) => cmd_shard(bank_size, pool_size, rank),
        Some(Command::Config) => cmd_config(&config),
        None => {
            debug!("main: no command, running with configured span");
            cmd_run(config, None, None, None).await
        }
    }
}

async fn cmd_run(
    mut config: Config,
    start: Option<GpsTime>,
    end: Option<GpsTime>,
    pool_size: Option<usize>,
) -> Result<()> {
    debug!(?start, ?end, ?pool_size, "cmd_run: called");
    if let Some(start) = start {
        config.analysis.start_time = start;
    }
    if let Some(end) = end {
        config.analysis.end_time = end;
    }
    if let Some(size) = pool_size {
        config.pool.size = size;
    }
    config.validate().context("Invalid configuration")?;

    let config = Arc::new(config);
    let factory = SimFactory::new(config.clone());
    let summary = run_pool(config.clone(), &factory).await?;
    print_summary(&config, &summary);
    Ok(())
}

fn print_summary(config: &Config, summary: &RunSummary) {
    println!(
        "Analyzed [{}, {}) in {}s windows with {} processes",
        config.analysis.start_time, config.analysis.end_time, config.analysis.window_length, config.pool.size
    );

    if let Some(coordinator) = summary.coordinator() {
        println!(
            "Coordinator: {} cycles, {} artifacts, {} uploads, {} archived, {} sink failures",
            coordinator.cycles,
            coordinator.artifacts_written,
            coordinator.uploads,
            coordinator.archived,
            coordinator.sink_failures
        );
    }

    for process in summary.processes.iter().filter(|p| p.rank != COORDINATOR_RANK) {
        let invalid: Vec<String> = process
            .invalid_cycles
            .iter()
            .map(|(ifo, count)| format!("{ifo}={count}"))
            .collect();
        println!(
            "Worker {}: {} templates, {} cycles, invalid [{}]",
            process.rank,
            process.templates,
            process.cycles,
            invalid.join(", ")
        );
    }

    println!(
        "Pool: {} gathers, {} reductions, {} barriers, {} rejected",
        summary.metrics.gathers_completed,
        summary.metrics.reductions_completed,
        summary.metrics.barriers_completed,
        summary.metrics.rejected_requests
    );
    println!("Artifacts in {}", config.output.directory.display());
}

fn cmd_shard(bank_size: usize, pool_size: usize, rank: Option<usize>) -> Result<()> {
    debug!(bank_size, pool_size, ?rank, "cmd_shard: called");
    if pool_size < 2 {
        return Err(ShardError::PoolTooSmall(pool_size).into());
    }
    let ranks: Vec<usize> = match rank {
        Some(rank) => vec![rank],
        None => (1..pool_size).collect(),
    };

    for rank in ranks {
        let shard = TemplateShard::for_rank(bank_size, pool_size, rank)?;
        let indices: Vec<String> = shard.indices().iter().map(|i| i.to_string()).collect();
        println!("rank {} ({} templates): {}", rank, shard.len(), indices.join(" "));
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
