//! Per-detector data-quality status for one cycle

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Why a detector was left out of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum InvalidReason {
    /// Advance timed out, the source had no data, or it fell out of step
    DataUnavailable,
    /// The noise spectrum could not be recomputed
    PsdRecalculationFailed,
    /// The noise-spectrum distance estimate fell outside the configured bounds
    SensitivityOutOfRange { distance: f64, min: f64, max: f64 },
    /// Another process in the pool reported the detector invalid
    PoolVeto,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataUnavailable => write!(f, "data unavailable"),
            Self::PsdRecalculationFailed => write!(f, "PSD recalculation failed"),
            Self::SensitivityOutOfRange { distance, min, max } => {
                write!(f, "PSD distance {distance:.2} outside [{min:.2}, {max:.2}]")
            }
            Self::PoolVeto => write!(f, "vetoed by pool"),
        }
    }
}

/// Status of one detector after the assessment phase of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorStatus {
    #[serde(rename = "data-available")]
    pub data_available: bool,

    #[serde(rename = "psd-updated")]
    pub psd_updated: bool,

    #[serde(rename = "psd-distance")]
    pub psd_distance: Option<f64>,

    /// None while the detector is usable this cycle
    pub invalid: Option<InvalidReason>,
}

impl DetectorStatus {
    pub fn available(psd_updated: bool, psd_distance: Option<f64>) -> Self {
        Self {
            data_available: true,
            psd_updated,
            psd_distance,
            invalid: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            data_available: false,
            psd_updated: false,
            psd_distance: None,
            invalid: Some(InvalidReason::DataUnavailable),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }

    /// Mark the detector invalid unless it already carries a reason
    pub fn invalidate(&mut self, reason: InvalidReason) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }
}

/// Statuses of every detector a process owns, keyed by detector name
pub type StatusMap = BTreeMap<String, DetectorStatus>;

/// Validity votes extracted from a status map
pub fn validity_votes(statuses: &StatusMap) -> BTreeMap<String, bool> {
    statuses
        .iter()
        .map(|(ifo, status)| (ifo.clone(), status.is_valid()))
        .collect()
}
