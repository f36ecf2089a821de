//! Message-passing pool for lock-step cycle coordination
//!
//! A single hub task mediates every collective between the ranks of the pool:
//! - **Gather:** workers submit one batch per cycle, the coordinator collects them
//! - **All-reduce:** every rank contributes per-detector validity, all receive the AND
//! - **Barrier:** every rank waits for the others at the end of a cycle

mod config;
mod handle;
mod hub;
mod messages;

pub use config::PoolConfig;
pub use handle::PoolHandle;
pub use hub::Pool;
pub use messages::{PoolError, PoolMetrics, PoolRequest, RankedBatch};
