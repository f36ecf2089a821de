//! Per-detector assessment: advance, PSD refresh and sensitivity check

use tracing::{debug, warn};

use crate::collab::{AdvanceStatus, StreamingDataSource};
use crate::config::{AnalysisConfig, SensitivityConfig};
use crate::domain::{CycleWindow, DetectorStatus, InvalidReason};

/// Move one detector's source onto `window` and decide whether it is usable
///
/// Never fails: every problem is recorded as an `InvalidReason` on the status.
pub async fn assess_detector(
    ifo: &str,
    source: &mut dyn StreamingDataSource,
    window: &CycleWindow,
    analysis: &AnalysisConfig,
    sensitivity: &SensitivityConfig,
) -> DetectorStatus {
    debug!(%ifo, %window, "assess_detector: called");
    let timeout = analysis.frame_read_timeout();

    // A source left behind by a timeout or a dropout asks for the whole gap
    let held = source.end_time();
    if held >= window.end {
        warn!(%ifo, end = window.end, source_end = held, "Source ahead of cycle clock");
        return DetectorStatus::unavailable();
    }
    let length = window.end - held;
    if length != window.length() {
        debug!(%ifo, length, source_end = held, "assess_detector: catching up");
    }

    let advanced = tokio::time::timeout(timeout, source.advance(length, timeout)).await;
    let needs_psd = match advanced {
        Ok(AdvanceStatus::Ready) => false,
        Ok(AdvanceStatus::NeedsPsdRecalculation) => true,
        Ok(AdvanceStatus::Unavailable) => {
            warn!(%ifo, end = window.end, "No data for window");
            return DetectorStatus::unavailable();
        }
        Err(_) => {
            warn!(%ifo, end = window.end, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for data");
            return DetectorStatus::unavailable();
        }
    };

    if source.end_time() != window.end {
        warn!(
            %ifo,
            end = window.end,
            source_end = source.end_time(),
            "Source out of step with cycle clock"
        );
        return DetectorStatus::unavailable();
    }

    let mut status = DetectorStatus::available(false, None);

    if needs_psd {
        if source.recalculate_psd().await {
            debug!(%ifo, "assess_detector: PSD recalculated");
            status.psd_updated = true;
        } else {
            warn!(%ifo, end = window.end, "PSD recalculation failed");
            status.invalidate(InvalidReason::PsdRecalculationFailed);
            return status;
        }
    }

    // No estimate yet means nothing to check against
    let Some(distance) = source.psd().map(|psd| psd.distance) else {
        debug!(%ifo, "assess_detector: no PSD yet, skipping sensitivity check");
        return status;
    };
    status.psd_distance = Some(distance);

    if !sensitivity.contains(distance) {
        warn!(
            %ifo,
            end = window.end,
            distance,
            min = sensitivity.min_distance,
            max = sensitivity.max_distance,
            "PSD distance outside sensitivity bounds"
        );
        status.invalidate(InvalidReason::SensitivityOutOfRange {
            distance,
            min: sensitivity.min_distance,
            max: sensitivity.max_distance,
        });
    }

    status
}
