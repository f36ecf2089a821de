//! Deterministic artifact paths

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::{CycleWindow, GpsTime};

/// Unix time of the GPS epoch, 1980-01-06T00:00:00Z
const GPS_EPOCH_UNIX: i64 = 315_964_800;

/// GPS times at which each leap second since the GPS epoch took effect
const LEAP_SECONDS: [GpsTime; 18] = [
    46_828_800,
    78_364_801,
    109_900_802,
    173_059_203,
    252_028_804,
    315_187_205,
    346_723_206,
    393_984_007,
    425_520_008,
    457_056_009,
    504_489_610,
    551_750_411,
    599_184_012,
    820_108_813,
    914_803_214,
    1_025_136_015,
    1_119_744_016,
    1_167_264_017,
];

/// Convert GPS seconds to UTC
pub fn gps_to_utc(gps: GpsTime) -> Option<DateTime<Utc>> {
    let leaps = LEAP_SECONDS.iter().filter(|&&t| t <= gps).count() as i64;
    let unix = i64::try_from(gps).ok()? + GPS_EPOCH_UNIX - leaps;
    DateTime::from_timestamp(unix, 0)
}

/// Day bucket `YYYY_MM_DD` for a GPS time
pub fn date_bucket(gps: GpsTime) -> Option<String> {
    gps_to_utc(gps).map(|utc| utc.format("%Y_%m_%d").to_string())
}

/// File name for one cycle: `<IFOS>-<LABEL>-<START>-<LENGTH>.json`
pub fn artifact_name(detectors: &[String], label: &str, window: &CycleWindow) -> String {
    let mut sorted: Vec<&str> = detectors.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{}-{}-{}-{}.json", sorted.concat(), label, window.start, window.length())
}

/// Full artifact path, optionally inside the window end's day bucket
pub fn artifact_path(
    root: &Path,
    detectors: &[String],
    label: &str,
    window: &CycleWindow,
    date_bucketing: bool,
) -> PathBuf {
    let mut dir = root.to_path_buf();
    if date_bucketing && let Some(bucket) = date_bucket(window.end) {
        dir.push(bucket);
    }
    dir.join(artifact_name(detectors, label, window))
}
