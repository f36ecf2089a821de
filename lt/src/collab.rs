//! Interfaces of the external collaborators driven by the cycle loop
//!
//! The numerical work (data conditioning, PSD estimation, matched filtering,
//! background statistics, alert submission) lives behind these traits.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CombinedResult, DetectorResult, GpsTime, StatusMap};

/// Outcome of asking a data source for its next window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStatus {
    /// Data for the window is in hand and the PSD is current
    Ready,
    /// Data for the window is in hand but the PSD should be recomputed first
    NeedsPsdRecalculation,
    /// No usable data arrived within the timeout
    Unavailable,
}

/// Snapshot of a detector's rolling noise-spectrum estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpectrum {
    /// Frequency resolution in Hz
    #[serde(rename = "delta-f")]
    pub delta_f: f64,

    /// One-sided PSD samples starting at 0 Hz
    pub values: Vec<f64>,

    /// Scalar sensitivity (horizon-like distance) derived from the PSD
    pub distance: f64,
}

/// Conditioned, advancing stream of one detector's data
#[async_trait]
pub trait StreamingDataSource: Send + Sync {
    /// Move to the next `length`-second window, waiting at most `timeout`
    async fn advance(&mut self, length: u64, timeout: Duration) -> AdvanceStatus;

    /// Recompute the noise spectrum; false if it could not be estimated
    async fn recalculate_psd(&mut self) -> bool;

    /// Current noise spectrum, or None if none has been computed yet
    fn psd(&self) -> Option<&NoiseSpectrum>;

    /// GPS end of the data currently held
    fn end_time(&self) -> GpsTime;
}

/// Matched-filter engine over one worker's template shard
#[async_trait]
pub trait FilterEngine: Send {
    /// Filter the current window of `source`; `Invalid` signals failure
    async fn process_window(&mut self, ifo: &str, source: &dyn StreamingDataSource) -> DetectorResult;
}

/// Coincidence/background mapping returned by the estimator, stored verbatim
pub type CoincidenceResult = BTreeMap<String, Vec<f64>>;

/// Key holding the foreground candidate's inverse false-alarm rate
pub const FOREGROUND_IFAR_KEY: &str = "foreground/ifar";

/// Foreground IFAR of a coincidence result, if a foreground candidate exists
pub fn foreground_ifar(result: &CoincidenceResult) -> Option<f64> {
    result.get(FOREGROUND_IFAR_KEY).and_then(|values| values.first().copied())
}

/// Consumes merged single-detector triggers and tracks background statistics
pub trait BackgroundEstimator: Send {
    fn add_singles(&mut self, combined: &CombinedResult, statuses: &StatusMap) -> CoincidenceResult;
}

/// Destination for candidate events
#[async_trait]
pub trait AlertSink: Send {
    /// Submit a significant candidate
    async fn upload(
        &mut self,
        artifact: &Path,
        psds: &BTreeMap<String, NoiseSpectrum>,
        low_frequency_cutoff: f64,
        testing: bool,
        annotations: &[String],
    ) -> eyre::Result<()>;

    /// Archive a candidate locally without submitting it
    async fn save(&mut self, artifact: &Path) -> eyre::Result<()>;
}
