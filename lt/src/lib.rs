//! LiveTrig - cycle coordinator for a streaming multi-detector trigger search
//!
//! A fixed pool of processes analyzes consecutive fixed-length windows of
//! detector data in lock-step. Rank 0 coordinates; every other rank filters a
//! static shard of the template bank. Each cycle the pool agrees on which
//! detectors are usable, the coordinator merges the workers' trigger batches,
//! and one artifact is written per cycle.
//!
//! # Modules
//!
//! - [`domain`] - Roles, windows, detector status and result batches
//! - [`shard`] - Round-robin template sharding
//! - [`pool`] - Message-passing hub for gather, all-reduce and barrier
//! - [`cycle`] - Per-detector assessment and the per-process loop
//! - [`aggregate`] - Merging worker batches
//! - [`output`] - Artifact naming, loudest-K retention and alert gating
//! - [`collab`] - Interfaces of the external numerical collaborators
//! - [`launch`] - Spawning a complete pool
//! - [`sim`] - Synthetic collaborators
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod aggregate;
pub mod cli;
pub mod collab;
pub mod config;
pub mod cycle;
pub mod domain;
pub mod launch;
pub mod output;
pub mod pool;
pub mod shard;
pub mod sim;

// Re-export commonly used types
pub use aggregate::{AggregationReport, combine};
pub use collab::{
    AdvanceStatus, AlertSink, BackgroundEstimator, CoincidenceResult, FilterEngine, NoiseSpectrum, StreamingDataSource,
};
pub use config::Config;
pub use cycle::{CycleRunner, ProcessSummary, SourceMap, Stage};
pub use domain::{
    CombinedResult, CycleWindow, DetectorResult, DetectorStatus, GpsTime, InvalidReason, ProcessRole, ResultBatch,
    StatusMap, TriggerSet, WindowSchedule,
};
pub use launch::{ProcessFactory, RunSummary, run_pool};
pub use output::{AlertDecision, OutputError, OutputWriter};
pub use pool::{Pool, PoolConfig, PoolError, PoolHandle, PoolMetrics};
pub use shard::{ShardError, TemplateShard};
