//! CycleRunner - the per-process analysis loop
//!
//! Every rank assesses its detectors each cycle and optionally agrees on
//! validity with the rest of the pool. Workers then filter their shard and
//! submit; the coordinator collects, merges and writes output.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use eyre::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::assess::assess_detector;
use crate::aggregate::{combine, mismatched_ends};
use crate::collab::{FilterEngine, NoiseSpectrum, StreamingDataSource};
use crate::config::Config;
use crate::domain::{
    CycleWindow, DetectorResult, DetectorStatus, InvalidReason, ProcessRole, ResultBatch, StatusMap, WindowSchedule,
    validity_votes,
};
use crate::output::OutputWriter;
use crate::pool::PoolHandle;
use crate::shard::TemplateShard;

/// Data sources owned by one process, keyed by detector name
pub type SourceMap = BTreeMap<String, Box<dyn StreamingDataSource>>;

/// Role-specific half of a runner
pub enum Stage {
    /// Gathers, merges and writes; never filters
    Coordinator { writer: OutputWriter },
    /// Filters its shard and submits one batch per cycle
    Worker {
        engine: Box<dyn FilterEngine>,
        shard: TemplateShard,
    },
}

impl Stage {
    pub fn role(&self) -> ProcessRole {
        match self {
            Self::Coordinator { .. } => ProcessRole::Coordinator,
            Self::Worker { .. } => ProcessRole::Worker,
        }
    }
}

/// What one process did over a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSummary {
    pub rank: usize,
    pub cycles: u64,
    /// Cycles each detector was unusable for this process
    pub invalid_cycles: BTreeMap<String, u64>,
    /// Templates filtered per cycle (workers)
    pub templates: usize,
    pub artifacts_written: u64,
    /// Candidates the alert sink accepted
    pub uploads: u64,
    pub archived: u64,
    pub sink_failures: u64,
    /// Window end of the last completed cycle
    pub last_end: Option<u64>,
}

/// Drives one rank through every window of the run
pub struct CycleRunner {
    config: Arc<Config>,
    pool: PoolHandle,
    sources: SourceMap,
    stage: Stage,
    summary: ProcessSummary,
}

impl CycleRunner {
    /// Build a runner; the stage must match the handle's rank
    pub fn new(config: Arc<Config>, pool: PoolHandle, sources: SourceMap, stage: Stage) -> Result<Self> {
        debug!(rank = pool.rank(), role = %stage.role(), "CycleRunner::new: called");
        if stage.role() != pool.role() {
            return Err(eyre::eyre!(
                "Rank {} is a {} but was given a {} stage",
                pool.rank(),
                pool.role(),
                stage.role()
            ));
        }

        let templates = match &stage {
            Stage::Worker { shard, .. } => shard.len(),
            Stage::Coordinator { .. } => 0,
        };
        let summary = ProcessSummary {
            rank: pool.rank(),
            templates,
            ..Default::default()
        };

        Ok(Self {
            config,
            pool,
            sources,
            stage,
            summary,
        })
    }

    pub fn rank(&self) -> usize {
        self.pool.rank()
    }

    pub fn role(&self) -> ProcessRole {
        self.stage.role()
    }

    /// Run every cycle until the stop time is reached
    pub async fn run(mut self) -> Result<ProcessSummary> {
        let analysis = &self.config.analysis;
        let schedule = WindowSchedule::new(analysis.start_time, analysis.end_time, analysis.window_length);
        info!(
            start = analysis.start_time,
            stop = analysis.end_time,
            length = analysis.window_length,
            templates = self.summary.templates,
            "Starting cycle loop"
        );

        for window in schedule {
            self.run_cycle(&window).await?;
        }

        info!(cycles = self.summary.cycles, "Cycle loop finished");
        Ok(self.summary)
    }

    /// One full cycle: assess, agree, filter or gather, optionally barrier
    pub async fn run_cycle(&mut self, window: &CycleWindow) -> Result<()> {
        debug!(%window, "CycleRunner::run_cycle: called");
        let started = Instant::now();

        let mut statuses = self.assess(window).await;

        if self.config.pool.sync_status {
            synchronize(&self.pool, window, &mut statuses).await?;
        }

        for (ifo, status) in &statuses {
            if !status.is_valid() {
                *self.summary.invalid_cycles.entry(ifo.clone()).or_default() += 1;
            }
        }

        match &mut self.stage {
            Stage::Worker { engine, .. } => {
                let batch = filter_window(engine.as_mut(), &self.sources, &statuses).await;
                self.pool
                    .submit(window.cycle, window.end, batch)
                    .await
                    .context(format!("Failed to submit results for cycle ending {}", window.end))?;
            }
            Stage::Coordinator { writer } => {
                let batches = self
                    .pool
                    .collect(window.cycle)
                    .await
                    .context(format!("Failed to collect results for cycle ending {}", window.end))?;

                let stale = mismatched_ends(&batches, window.end);
                if !stale.is_empty() {
                    warn!(end = window.end, ?stale, "Batches produced for a different window end");
                }

                let (combined, report) = combine(&batches);
                if !report.invalid.is_empty() || !report.inconsistent.is_empty() {
                    debug!(end = window.end, ?report, "CycleRunner::run_cycle: detectors dropped");
                }

                let psds = snapshot_psds(&self.sources);
                let output = writer
                    .write_cycle(window, &combined, &statuses, &psds)
                    .await
                    .context(format!("Failed to write output for cycle ending {}", window.end))?;
                debug!(
                    path = %output.path.display(),
                    decision = ?output.decision,
                    "CycleRunner::run_cycle: output written"
                );

                let stats = writer.stats();
                self.summary.artifacts_written = stats.artifacts_written;
                self.summary.uploads = stats.uploads;
                self.summary.archived = stats.archived_candidates;
                self.summary.sink_failures = stats.sink_failures;
            }
        }

        if self.config.pool.barrier {
            self.pool
                .barrier(window.cycle)
                .await
                .context(format!("Barrier failed for cycle ending {}", window.end))?;
        }

        self.summary.cycles += 1;
        self.summary.last_end = Some(window.end);

        let valid = statuses.values().filter(|s| s.is_valid()).count();
        info!(
            end = window.end,
            valid,
            detectors = statuses.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        Ok(())
    }

    /// Assess every configured detector; the advances wait concurrently
    async fn assess(&mut self, window: &CycleWindow) -> StatusMap {
        let analysis = &self.config.analysis;
        let sensitivity = &self.config.sensitivity;
        let configured = self.config.detector_names();

        let pending = self
            .sources
            .iter_mut()
            .filter(|(ifo, _)| configured.contains(*ifo))
            .map(|(ifo, source)| async move {
                let status = assess_detector(ifo, source.as_mut(), window, analysis, sensitivity).await;
                (ifo.clone(), status)
            });
        let mut statuses: StatusMap = join_all(pending).await.into_iter().collect();

        for ifo in configured {
            if !statuses.contains_key(&ifo) {
                warn!(%ifo, end = window.end, "No data source for detector");
                statuses.insert(ifo, DetectorStatus::unavailable());
            }
        }

        statuses
    }
}

/// AND this rank's validity with every other rank's
async fn synchronize(pool: &PoolHandle, window: &CycleWindow, statuses: &mut StatusMap) -> Result<()> {
    let agreed = pool
        .all_reduce_and(window.cycle, validity_votes(statuses))
        .await
        .context(format!("Status reduction failed for cycle ending {}", window.end))?;

    for (ifo, status) in statuses.iter_mut() {
        let valid = agreed.get(ifo).copied().unwrap_or(false);
        if !valid && status.is_valid() {
            info!(%ifo, end = window.end, "Detector vetoed by another process");
            status.invalidate(InvalidReason::PoolVeto);
        }
    }
    Ok(())
}

/// Filter every valid detector; everything else is reported invalid
async fn filter_window(engine: &mut dyn FilterEngine, sources: &SourceMap, statuses: &StatusMap) -> ResultBatch {
    let mut batch = ResultBatch::new();
    for (ifo, status) in statuses {
        let result = match sources.get(ifo) {
            Some(source) if status.is_valid() => engine.process_window(ifo, source.as_ref()).await,
            _ => DetectorResult::Invalid,
        };
        if result.is_invalid() && status.is_valid() {
            warn!(%ifo, "Filter engine reported failure");
        }
        batch.insert(ifo.clone(), result);
    }
    batch
}

fn snapshot_psds(sources: &SourceMap) -> BTreeMap<String, NoiseSpectrum> {
    sources
        .iter()
        .filter_map(|(ifo, source)| source.psd().map(|psd| (ifo.clone(), psd.clone())))
        .collect()
}
