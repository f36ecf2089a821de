//! Per-cycle artifacts, alert gating and loudest-trigger retention

mod artifact;
mod loudest;
mod naming;
mod writer;

pub use artifact::{Artifact, DetectorGroup};
pub use loudest::{loudest_union, new_snr};
pub use naming::{artifact_name, artifact_path, date_bucket, gps_to_utc};
pub use writer::{AlertDecision, CycleOutput, OutputError, OutputStats, OutputWriter};
