//! Domain types for the cycle coordinator
//!
//! Roles, analysis windows, per-detector status and the result batches that
//! flow from workers to the coordinator.

mod batch;
mod role;
mod status;
mod window;

pub use batch::{BatchError, CombinedResult, DetectorResult, ResultBatch, TriggerSet};
pub use role::{COORDINATOR_RANK, ProcessRole};
pub use status::{DetectorStatus, InvalidReason, StatusMap, validity_votes};
pub use window::{CycleWindow, GpsTime, WindowSchedule};
