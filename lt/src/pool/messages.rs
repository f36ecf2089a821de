//! Message types for the pool hub

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{GpsTime, ResultBatch};

/// Errors from collective operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Rank {rank} may not {operation}")]
    RoleViolation { rank: usize, operation: &'static str },

    #[error("Rank {rank} is outside a pool of size {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("Rank {rank} already contributed to {operation} for cycle {cycle}")]
    DuplicateContribution {
        rank: usize,
        cycle: u64,
        operation: &'static str,
    },

    #[error("Pool channel closed")]
    ChannelClosed,
}

/// A worker's batch as received by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedBatch {
    pub rank: usize,

    /// GPS end of the window the worker analyzed
    #[serde(rename = "end-time")]
    pub end_time: GpsTime,

    pub batch: ResultBatch,
}

/// Requests served by the pool hub
#[derive(Debug)]
pub enum PoolRequest {
    /// A worker hands in its batch; acknowledged once the coordinator collects
    Submit {
        rank: usize,
        cycle: u64,
        end_time: GpsTime,
        batch: ResultBatch,
        ack: oneshot::Sender<Result<(), PoolError>>,
    },

    /// The coordinator waits for every worker's batch
    Collect {
        rank: usize,
        cycle: u64,
        reply: oneshot::Sender<Result<Vec<RankedBatch>, PoolError>>,
    },

    /// Every rank contributes per-detector validity; all receive the AND
    Reduce {
        rank: usize,
        cycle: u64,
        votes: BTreeMap<String, bool>,
        reply: oneshot::Sender<Result<BTreeMap<String, bool>, PoolError>>,
    },

    /// Every rank waits until all ranks arrive
    Barrier {
        rank: usize,
        cycle: u64,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },

    /// Get current metrics
    GetMetrics { reply: oneshot::Sender<PoolMetrics> },

    /// Shutdown the hub
    Shutdown,
}

/// Hub metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub messages_received: u64,
    pub gathers_completed: u64,
    pub reductions_completed: u64,
    pub barriers_completed: u64,
    pub pending_collectives: usize,
    pub rejected_requests: u64,
}
