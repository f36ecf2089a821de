//! Pool launcher
//!
//! Starts the hub and one task per rank, then waits for every rank to finish.
//! The first rank to fail aborts the rest of the pool.

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span};

use crate::collab::{AlertSink, BackgroundEstimator, FilterEngine};
use crate::config::Config;
use crate::cycle::{CycleRunner, ProcessSummary, SourceMap, Stage};
use crate::domain::{COORDINATOR_RANK, ProcessRole};
use crate::output::OutputWriter;
use crate::pool::{Pool, PoolMetrics};
use crate::shard::TemplateShard;

/// Builds the external collaborators each rank owns
pub trait ProcessFactory {
    /// Data sources for every detector `rank` reads
    fn data_sources(&self, rank: usize) -> Result<SourceMap>;

    /// Filter engine over one worker's shard
    fn filter_engine(&self, shard: &TemplateShard) -> Result<Box<dyn FilterEngine>>;

    /// Background estimator for the coordinator, if any
    fn background(&self) -> Option<Box<dyn BackgroundEstimator>> {
        None
    }

    /// Alert sink for the coordinator, if any
    fn alert_sink(&self) -> Option<Box<dyn AlertSink>> {
        None
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One entry per rank, in rank order
    pub processes: Vec<ProcessSummary>,
    pub metrics: PoolMetrics,
}

impl RunSummary {
    pub fn coordinator(&self) -> Option<&ProcessSummary> {
        self.processes.iter().find(|p| p.rank == COORDINATOR_RANK)
    }
}

fn build_runner(config: &Arc<Config>, pool: &Pool, rank: usize, factory: &dyn ProcessFactory) -> Result<CycleRunner> {
    let handle = pool.handle(rank)?;
    let sources = factory
        .data_sources(rank)
        .context(format!("Failed to open data sources for rank {rank}"))?;

    let stage = match ProcessRole::from_rank(rank) {
        ProcessRole::Coordinator => {
            let mut writer = OutputWriter::new(config.clone());
            if let Some(background) = factory.background() {
                writer = writer.with_background(background);
            }
            if let Some(sink) = factory.alert_sink() {
                writer = writer.with_sink(sink);
            }
            Stage::Coordinator { writer }
        }
        ProcessRole::Worker => {
            let shard = TemplateShard::for_rank(config.templates.bank_size, config.pool.size, rank)?;
            let engine = factory
                .filter_engine(&shard)
                .context(format!("Failed to create filter engine for rank {rank}"))?;
            Stage::Worker { engine, shard }
        }
    };

    CycleRunner::new(config.clone(), handle, sources, stage)
}

/// Run a full pool to completion
pub async fn run_pool(config: Arc<Config>, factory: &dyn ProcessFactory) -> Result<RunSummary> {
    debug!(size = config.pool.size, "run_pool: called");
    config.validate()?;

    let pool = Pool::new(config.pool.clone());
    let control = pool.handle(COORDINATOR_RANK)?;

    // Build every runner before anything starts so setup failures leave nothing running
    let mut runners = Vec::with_capacity(config.pool.size);
    for rank in 0..config.pool.size {
        runners.push(build_runner(&config, &pool, rank, factory)?);
    }

    let hub = tokio::spawn(pool.run());
    let mut ranks = JoinSet::new();
    for runner in runners {
        let span = info_span!("process", rank = runner.rank(), role = %runner.role());
        ranks.spawn(runner.run().instrument(span));
    }
    info!(size = config.pool.size, "Pool started");

    let mut processes = Vec::with_capacity(config.pool.size);
    while let Some(joined) = ranks.join_next().await {
        let outcome = joined.map_err(eyre::Report::from).and_then(|result| result);
        match outcome {
            Ok(summary) => {
                debug!(rank = summary.rank, cycles = summary.cycles, "run_pool: rank finished");
                processes.push(summary);
            }
            Err(e) => {
                error!(error = %e, "Rank failed, aborting pool");
                ranks.abort_all();
                hub.abort();
                return Err(e.wrap_err("Pool aborted"));
            }
        }
    }

    let metrics = control.metrics().await?;
    control.shutdown().await?;
    hub.await.context("Pool hub panicked")?;

    processes.sort_by_key(|p| p.rank);
    info!(
        ranks = processes.len(),
        gathers = metrics.gathers_completed,
        rejected = metrics.rejected_requests,
        "Pool finished"
    );
    Ok(RunSummary { processes, metrics })
}
