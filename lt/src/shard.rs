//! Static round-robin sharding of the template bank across workers
//!
//! Template `i` belongs to worker `1 + (i mod (P - 1))`. The coordinator
//! (rank 0) holds no templates and the assignment never changes during a run.

use thiserror::Error;

use crate::domain::COORDINATOR_RANK;

/// Errors computing a shard
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("Pool of size {0} has no workers; at least 2 processes are required")]
    PoolTooSmall(usize),

    #[error("Rank {rank} is not a worker in a pool of size {pool_size}")]
    NotAWorker { rank: usize, pool_size: usize },
}

/// Templates assigned to one worker, as ascending global bank indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateShard {
    pub rank: usize,
    pub pool_size: usize,
    indices: Vec<usize>,
}

impl TemplateShard {
    /// Compute the shard of `rank` for a bank of `bank_size` templates
    pub fn for_rank(bank_size: usize, pool_size: usize, rank: usize) -> Result<Self, ShardError> {
        if pool_size < 2 {
            return Err(ShardError::PoolTooSmall(pool_size));
        }
        if rank == COORDINATOR_RANK || rank >= pool_size {
            return Err(ShardError::NotAWorker { rank, pool_size });
        }

        let workers = pool_size - 1;
        let indices = (rank - 1..bank_size).step_by(workers).collect();
        Ok(Self {
            rank,
            pool_size,
            indices,
        })
    }

    /// Worker rank that owns global template `index`
    pub fn owner_of(index: usize, pool_size: usize) -> Result<usize, ShardError> {
        if pool_size < 2 {
            return Err(ShardError::PoolTooSmall(pool_size));
        }
        Ok(1 + index % (pool_size - 1))
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Select this shard's templates from the full bank
    pub fn select<'a, T>(&self, bank: &'a [T]) -> Vec<&'a T> {
        self.indices.iter().filter_map(|&i| bank.get(i)).collect()
    }
}
