//! PoolHandle - per-rank interface to the pool hub

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{PoolError, PoolMetrics, PoolRequest, RankedBatch};
use crate::domain::{GpsTime, ProcessRole, ResultBatch};

/// Handle one rank uses for every collective operation
///
/// Cheap to clone; all clones speak for the same rank.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<PoolRequest>,
    rank: usize,
    size: usize,
}

impl PoolHandle {
    pub(crate) fn new(tx: mpsc::Sender<PoolRequest>, rank: usize, size: usize) -> Self {
        debug!(rank, size, "PoolHandle::new: called");
        Self { tx, rank, size }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn role(&self) -> ProcessRole {
        ProcessRole::from_rank(self.rank)
    }

    /// Hand this worker's batch to the coordinator
    ///
    /// Returns once the coordinator has collected the cycle.
    pub async fn submit(&self, cycle: u64, end_time: GpsTime, batch: ResultBatch) -> Result<(), PoolError> {
        debug!(rank = self.rank, cycle, end_time, "PoolHandle::submit: called");
        let (ack, ack_rx) = oneshot::channel();
        self.send(PoolRequest::Submit {
            rank: self.rank,
            cycle,
            end_time,
            batch,
            ack,
        })
        .await?;
        ack_rx.await.map_err(|_| PoolError::ChannelClosed)?
    }

    /// Receive every worker's batch for a cycle, in rank order
    pub async fn collect(&self, cycle: u64) -> Result<Vec<RankedBatch>, PoolError> {
        debug!(rank = self.rank, cycle, "PoolHandle::collect: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(PoolRequest::Collect {
            rank: self.rank,
            cycle,
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| PoolError::ChannelClosed)?
    }

    /// Combine per-detector validity with every other rank by logical AND
    pub async fn all_reduce_and(
        &self,
        cycle: u64,
        votes: BTreeMap<String, bool>,
    ) -> Result<BTreeMap<String, bool>, PoolError> {
        debug!(rank = self.rank, cycle, ?votes, "PoolHandle::all_reduce_and: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(PoolRequest::Reduce {
            rank: self.rank,
            cycle,
            votes,
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| PoolError::ChannelClosed)?
    }

    /// Wait until every rank reaches the end of `cycle`
    pub async fn barrier(&self, cycle: u64) -> Result<(), PoolError> {
        debug!(rank = self.rank, cycle, "PoolHandle::barrier: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(PoolRequest::Barrier {
            rank: self.rank,
            cycle,
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| PoolError::ChannelClosed)?
    }

    /// Get current hub metrics
    pub async fn metrics(&self) -> Result<PoolMetrics, PoolError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(PoolRequest::GetMetrics { reply }).await?;
        reply_rx.await.map_err(|_| PoolError::ChannelClosed)
    }

    /// Request shutdown of the hub
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        debug!(rank = self.rank, "PoolHandle::shutdown: called");
        self.send(PoolRequest::Shutdown).await
    }

    async fn send(&self, request: PoolRequest) -> Result<(), PoolError> {
        self.tx.send(request).await.map_err(|_| PoolError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_identity() {
        let (tx, _rx) = mpsc::channel(10);
        let handle = PoolHandle::new(tx, 0, 4);

        assert_eq!(handle.rank(), 0);
        assert_eq!(handle.size(), 4);
        assert_eq!(handle.role(), ProcessRole::Coordinator);
    }

    #[tokio::test]
    async fn test_closed_hub_reports_channel_closed() {
        let (tx, rx) = mpsc::channel(10);
        drop(rx);
        let handle = PoolHandle::new(tx, 1, 2);

        assert_eq!(handle.barrier(0).await.unwrap_err(), PoolError::ChannelClosed);
        assert_eq!(
            handle.submit(0, 8, ResultBatch::new()).await.unwrap_err(),
            PoolError::ChannelClosed
        );
    }
}
