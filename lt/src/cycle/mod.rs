//! The per-process cycle loop
//!
//! Each cycle runs `Advance -> RecalculatePSD -> SensitivityCheck ->
//! [StatusReduce] -> Filter-or-Skip` for every detector, then hands the
//! batch to the coordinator.

mod assess;
mod runner;

pub use assess::assess_detector;
pub use runner::{CycleRunner, ProcessSummary, SourceMap, Stage};
