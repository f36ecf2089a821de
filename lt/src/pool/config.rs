//! Pool configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Process pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of processes, including the coordinator
    #[serde(default = "default_size")]
    pub size: usize,

    /// AND-reduce detector validity across the pool before filtering
    #[serde(rename = "sync-status", default = "default_sync_status")]
    pub sync_status: bool,

    /// Wait for every process at the end of each cycle
    #[serde(default)]
    pub barrier: bool,

    /// Channel buffer size for pool requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_size() -> usize {
    debug!("default_size: called");
    3
}

fn default_sync_status() -> bool {
    debug!("default_sync_status: called");
    true
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    256
}

impl Default for PoolConfig {
    fn default() -> Self {
        debug!("PoolConfig::default: called");
        Self {
            size: 3,
            sync_status: true,
            barrier: false,
            channel_buffer: 256,
        }
    }
}

impl PoolConfig {
    /// Number of worker processes
    pub fn workers(&self) -> usize {
        self.size.saturating_sub(1)
    }
}
