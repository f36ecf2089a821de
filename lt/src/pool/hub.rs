//! Pool hub task implementation
//!
//! The hub owns all collective state. Each collective is keyed by cycle and
//! completes once every required rank has contributed; replies are released
//! together, so arrival order never affects the result.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::handle::PoolHandle;
use super::messages::{PoolError, PoolMetrics, PoolRequest, RankedBatch};
use crate::domain::{COORDINATOR_RANK, GpsTime, ResultBatch};

type Reply<T> = oneshot::Sender<Result<T, PoolError>>;

/// Worker batches for one cycle and the parties waiting on them
#[derive(Default)]
struct PendingGather {
    batches: BTreeMap<usize, (GpsTime, ResultBatch)>,
    acks: Vec<Reply<()>>,
    collector: Option<Reply<Vec<RankedBatch>>>,
}

/// Validity votes for one cycle
#[derive(Default)]
struct PendingReduce {
    votes: BTreeMap<usize, BTreeMap<String, bool>>,
    replies: Vec<Reply<BTreeMap<String, bool>>>,
}

impl PendingReduce {
    /// AND over every contribution; a detector missing from any vote is false
    fn reduce(&self) -> BTreeMap<String, bool> {
        let detectors: BTreeSet<&String> = self.votes.values().flat_map(|v| v.keys()).collect();
        detectors
            .into_iter()
            .map(|ifo| {
                let valid = self.votes.values().all(|v| v.get(ifo).copied().unwrap_or(false));
                (ifo.clone(), valid)
            })
            .collect()
    }
}

/// Arrivals at the end-of-cycle barrier
#[derive(Default)]
struct PendingBarrier {
    arrived: BTreeSet<usize>,
    replies: Vec<Reply<()>>,
}

/// The hub every rank of the pool talks to
pub struct Pool {
    config: PoolConfig,
    tx: mpsc::Sender<PoolRequest>,
    rx: mpsc::Receiver<PoolRequest>,
}

impl Pool {
    /// Create a new hub with the given configuration
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        Self { config, tx, rx }
    }

    /// Create the handle for one rank
    pub fn handle(&self, rank: usize) -> Result<PoolHandle, PoolError> {
        if rank >= self.config.size {
            return Err(PoolError::InvalidRank {
                rank,
                size: self.config.size,
            });
        }
        Ok(PoolHandle::new(self.tx.clone(), rank, self.config.size))
    }

    /// Run the hub task
    ///
    /// This consumes the hub and runs until shutdown is requested or every
    /// sender is dropped.
    pub async fn run(mut self) {
        let size = self.config.size;
        let workers = self.config.workers();

        let mut gathers: HashMap<u64, PendingGather> = HashMap::new();
        let mut reductions: HashMap<u64, PendingReduce> = HashMap::new();
        let mut barriers: HashMap<u64, PendingBarrier> = HashMap::new();

        let mut metrics = PoolMetrics::default();

        info!(size, "Pool hub started");

        while let Some(req) = self.rx.recv().await {
            metrics.messages_received += 1;

            match req {
                PoolRequest::Submit {
                    rank,
                    cycle,
                    end_time,
                    batch,
                    ack,
                } => {
                    if let Err(e) = check_rank(rank, size) {
                        metrics.rejected_requests += 1;
                        let _ = ack.send(Err(e));
                        continue;
                    }
                    if rank == COORDINATOR_RANK {
                        warn!(rank, cycle, "Coordinator attempted to submit results");
                        metrics.rejected_requests += 1;
                        let _ = ack.send(Err(PoolError::RoleViolation {
                            rank,
                            operation: "submit results",
                        }));
                        continue;
                    }

                    let gather = gathers.entry(cycle).or_default();
                    if gather.batches.contains_key(&rank) {
                        metrics.rejected_requests += 1;
                        let _ = ack.send(Err(PoolError::DuplicateContribution {
                            rank,
                            cycle,
                            operation: "gather",
                        }));
                        continue;
                    }

                    debug!(rank, cycle, end_time, detectors = batch.len(), "Received batch");
                    gather.batches.insert(rank, (end_time, batch));
                    gather.acks.push(ack);

                    if try_complete_gather(&mut gathers, cycle, workers) {
                        metrics.gathers_completed += 1;
                    }
                }

                PoolRequest::Collect { rank, cycle, reply } => {
                    if rank != COORDINATOR_RANK {
                        warn!(rank, cycle, "Worker attempted to collect results");
                        metrics.rejected_requests += 1;
                        let _ = reply.send(Err(PoolError::RoleViolation {
                            rank,
                            operation: "collect results",
                        }));
                        continue;
                    }

                    let gather = gathers.entry(cycle).or_default();
                    if gather.collector.is_some() {
                        metrics.rejected_requests += 1;
                        let _ = reply.send(Err(PoolError::DuplicateContribution {
                            rank,
                            cycle,
                            operation: "gather",
                        }));
                        continue;
                    }

                    debug!(cycle, received = gather.batches.len(), workers, "Coordinator collecting");
                    gather.collector = Some(reply);

                    if try_complete_gather(&mut gathers, cycle, workers) {
                        metrics.gathers_completed += 1;
                    }
                }

                PoolRequest::Reduce {
                    rank,
                    cycle,
                    votes,
                    reply,
                } => {
                    if let Err(e) = check_rank(rank, size) {
                        metrics.rejected_requests += 1;
                        let _ = reply.send(Err(e));
                        continue;
                    }

                    let pending = reductions.entry(cycle).or_default();
                    if pending.votes.contains_key(&rank) {
                        metrics.rejected_requests += 1;
                        let _ = reply.send(Err(PoolError::DuplicateContribution {
                            rank,
                            cycle,
                            operation: "status reduction",
                        }));
                        continue;
                    }

                    pending.votes.insert(rank, votes);
                    pending.replies.push(reply);

                    if pending.votes.len() == size
                        && let Some(pending) = reductions.remove(&cycle)
                    {
                        let reduced = pending.reduce();
                        debug!(cycle, ?reduced, "Status reduction complete");
                        for reply in pending.replies {
                            let _ = reply.send(Ok(reduced.clone()));
                        }
                        metrics.reductions_completed += 1;
                    }
                }

                PoolRequest::Barrier { rank, cycle, reply } => {
                    if let Err(e) = check_rank(rank, size) {
                        metrics.rejected_requests += 1;
                        let _ = reply.send(Err(e));
                        continue;
                    }

                    let pending = barriers.entry(cycle).or_default();
                    if !pending.arrived.insert(rank) {
                        metrics.rejected_requests += 1;
                        let _ = reply.send(Err(PoolError::DuplicateContribution {
                            rank,
                            cycle,
                            operation: "barrier",
                        }));
                        continue;
                    }
                    pending.replies.push(reply);

                    if pending.arrived.len() == size
                        && let Some(pending) = barriers.remove(&cycle)
                    {
                        debug!(cycle, "Barrier released");
                        for reply in pending.replies {
                            let _ = reply.send(Ok(()));
                        }
                        metrics.barriers_completed += 1;
                    }
                }

                PoolRequest::GetMetrics { reply } => {
                    metrics.pending_collectives = gathers.len() + reductions.len() + barriers.len();
                    let _ = reply.send(metrics.clone());
                }

                PoolRequest::Shutdown => {
                    info!("Pool hub shutting down");
                    break;
                }
            }
        }

        let pending = gathers.len() + reductions.len() + barriers.len();
        if pending > 0 {
            warn!(pending, "Pool hub stopped with collectives still pending");
        }
        info!("Pool hub stopped");
    }
}

fn check_rank(rank: usize, size: usize) -> Result<(), PoolError> {
    if rank >= size {
        return Err(PoolError::InvalidRank { rank, size });
    }
    Ok(())
}

/// Release a gather once the collector and every worker are present
///
/// Batches are handed over in ascending rank order.
fn try_complete_gather(gathers: &mut HashMap<u64, PendingGather>, cycle: u64, workers: usize) -> bool {
    let ready = gathers
        .get(&cycle)
        .is_some_and(|g| g.collector.is_some() && g.batches.len() == workers);
    if !ready {
        return false;
    }
    let Some(gather) = gathers.remove(&cycle) else {
        return false;
    };

    let batches: Vec<RankedBatch> = gather
        .batches
        .into_iter()
        .map(|(rank, (end_time, batch))| RankedBatch { rank, end_time, batch })
        .collect();

    debug!(cycle, batches = batches.len(), "Gather complete");
    if let Some(collector) = gather.collector {
        let _ = collector.send(Ok(batches));
    }
    for ack in gather.acks {
        let _ = ack.send(Ok(()));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DetectorResult;
    use std::time::Duration;

    fn pool(size: usize) -> Pool {
        Pool::new(PoolConfig {
            size,
            ..Default::default()
        })
    }

    fn batch_with(ifo: &str, result: DetectorResult) -> ResultBatch {
        let mut batch = ResultBatch::new();
        batch.insert(ifo.to_string(), result);
        batch
    }

    #[tokio::test]
    async fn test_gather_orders_by_rank() {
        let pool = pool(4);
        let handles: Vec<_> = (0..4).map(|r| pool.handle(r).unwrap()).collect();
        let hub = tokio::spawn(pool.run());

        // Submit in reverse rank order
        let mut submits = Vec::new();
        for rank in [3, 1, 2] {
            let handle = handles[rank].clone();
            submits.push(tokio::spawn(async move {
                handle.submit(0, 108, batch_with("H1", DetectorResult::Invalid)).await
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let batches = handles[0].collect(0).await.unwrap();
        let ranks: Vec<usize> = batches.iter().map(|b| b.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);

        for submit in submits {
            assert!(submit.await.unwrap().is_ok());
        }

        handles[0].shutdown().await.unwrap();
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_waits_for_collect() {
        let pool = pool(2);
        let coordinator = pool.handle(0).unwrap();
        let worker = pool.handle(1).unwrap();
        let hub = tokio::spawn(pool.run());

        let submit = tokio::spawn(async move { worker.submit(5, 48, ResultBatch::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!submit.is_finished());

        let batches = coordinator.collect(5).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].end_time, 48);
        assert!(submit.await.unwrap().is_ok());

        coordinator.shutdown().await.unwrap();
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_role_violations() {
        let pool = pool(3);
        let coordinator = pool.handle(0).unwrap();
        let worker = pool.handle(1).unwrap();
        let hub = tokio::spawn(pool.run());

        let err = coordinator.submit(0, 8, ResultBatch::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::RoleViolation { rank: 0, .. }));

        let err = worker.collect(0).await.unwrap_err();
        assert!(matches!(err, PoolError::RoleViolation { rank: 1, .. }));

        let metrics = coordinator.metrics().await.unwrap();
        assert_eq!(metrics.rejected_requests, 2);

        coordinator.shutdown().await.unwrap();
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_rank_handle() {
        let pool = pool(3);
        assert_eq!(pool.handle(3).unwrap_err(), PoolError::InvalidRank { rank: 3, size: 3 });
    }

    #[tokio::test]
    async fn test_reduce_is_logical_and() {
        let pool = pool(3);
        let handles: Vec<_> = (0..3).map(|r| pool.handle(r).unwrap()).collect();
        let hub = tokio::spawn(pool.run());

        let votes = [
            [("H1", true), ("L1", true)],
            [("H1", false), ("L1", true)],
            [("H1", true), ("L1", true)],
        ];

        let mut tasks = Vec::new();
        for (rank, vote) in votes.iter().enumerate() {
            let handle = handles[rank].clone();
            let vote: BTreeMap<String, bool> = vote.iter().map(|(k, v)| (k.to_string(), *v)).collect();
            tasks.push(tokio::spawn(async move { handle.all_reduce_and(2, vote).await }));
        }

        for task in tasks {
            let reduced = task.await.unwrap().unwrap();
            assert_eq!(reduced["H1"], false);
            assert_eq!(reduced["L1"], true);
        }

        handles[0].shutdown().await.unwrap();
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_reduce_missing_detector_is_invalid() {
        let pool = pool(2);
        let a = pool.handle(0).unwrap();
        let b = pool.handle(1).unwrap();
        let hub = tokio::spawn(pool.run());

        let first = tokio::spawn(async move {
            let votes = [("H1".to_string(), true), ("V1".to_string(), true)].into_iter().collect();
            a.all_reduce_and(0, votes).await
        });
        let votes = [("H1".to_string(), true)].into_iter().collect();
        let second = b.all_reduce_and(0, votes).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second["H1"], true);
        assert_eq!(second["V1"], false);

        b.shutdown().await.unwrap();
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_barrier_releases_all() {
        let pool = pool(3);
        let handles: Vec<_> = (0..3).map(|r| pool.handle(r).unwrap()).collect();
        let hub = tokio::spawn(pool.run());

        let early = {
            let h0 = handles[0].clone();
            let h1 = handles[1].clone();
            tokio::spawn(async move { tokio::try_join!(h0.barrier(7), h1.barrier(7)) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!early.is_finished());

        handles[2].barrier(7).await.unwrap();
        assert!(early.await.unwrap().is_ok());

        let metrics = handles[0].metrics().await.unwrap();
        assert_eq!(metrics.barriers_completed, 1);
        assert_eq!(metrics.pending_collectives, 0);

        handles[0].shutdown().await.unwrap();
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_barrier_rejected() {
        let pool = pool(2);
        let h0 = pool.handle(0).unwrap();
        let hub = tokio::spawn(pool.run());

        let first = {
            let h0 = h0.clone();
            tokio::spawn(async move { h0.barrier(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = h0.barrier(1).await.unwrap_err();
        assert!(matches!(err, PoolError::DuplicateContribution { rank: 0, cycle: 1, .. }));

        h0.shutdown().await.unwrap();
        hub.await.unwrap();
        // Pending barrier is dropped with the hub
        assert_eq!(first.await.unwrap().unwrap_err(), PoolError::ChannelClosed);
    }
}
