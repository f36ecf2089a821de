//! Merging worker batches into one result per cycle
//!
//! A detector survives only if no worker marked it invalid; survivors are the
//! concatenation of every worker's arrays in ascending rank order.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::domain::{CombinedResult, DetectorResult, GpsTime, TriggerSet};
use crate::pool::RankedBatch;

/// Detectors dropped from a cycle and why
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    /// Dropped because at least one rank reported them invalid or omitted them
    pub invalid: BTreeSet<String>,
    /// Dropped because workers disagreed on the array names
    pub inconsistent: BTreeSet<String>,
}

/// Merge the batches of one cycle
///
/// `batches` may arrive in any order; they are merged by ascending rank.
pub fn combine(batches: &[RankedBatch]) -> (CombinedResult, AggregationReport) {
    let mut ordered: Vec<&RankedBatch> = batches.iter().collect();
    ordered.sort_by_key(|b| b.rank);

    let detectors: BTreeSet<&String> = ordered.iter().flat_map(|b| b.batch.keys()).collect();

    let mut combined = CombinedResult::new();
    let mut report = AggregationReport::default();

    'detectors: for ifo in detectors {
        let mut merged = TriggerSet::default();
        for ranked in &ordered {
            match ranked.batch.get(ifo) {
                None | Some(DetectorResult::Invalid) => {
                    debug!(%ifo, rank = ranked.rank, "Detector invalid for this cycle");
                    report.invalid.insert(ifo.clone());
                    continue 'detectors;
                }
                // A worker with no templates contributes nothing
                Some(DetectorResult::Batch(set)) if set.arrays().is_empty() => {}
                Some(DetectorResult::Batch(set)) => {
                    if let Err(e) = merged.extend_from(set) {
                        warn!(%ifo, rank = ranked.rank, error = %e, "Dropping detector with inconsistent arrays");
                        report.inconsistent.insert(ifo.clone());
                        continue 'detectors;
                    }
                }
            }
        }
        combined.insert(ifo.clone(), merged);
    }

    (combined, report)
}

/// Ranks whose batch was produced for a different window end than `end`
pub fn mismatched_ends(batches: &[RankedBatch], end: GpsTime) -> Vec<usize> {
    let mut ranks: Vec<usize> = batches.iter().filter(|b| b.end_time != end).map(|b| b.rank).collect();
    ranks.sort_unstable();
    ranks
}
