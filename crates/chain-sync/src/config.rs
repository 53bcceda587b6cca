// chain-sync/src/config.rs

use ledger_core::ChainId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of a sync session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Chain id every synced block header must be signed for
    pub chain_id: ChainId,
    /// Leaves requested per fragment segment
    pub fragment_length: usize,
    /// Invalid bundles tolerated from one peer for one window
    pub max_fragment_attempts: u32,
    /// Leaves accepted from one peer for one window before giving up on it
    pub max_window_leaves: usize,
    /// Blocks requested per block range request
    pub block_batch_size: u64,
    /// Chains fetched concurrently
    pub max_concurrent_chain_requests: usize,
    /// Per request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Width of the fast sync band, in head hash windows
    pub fast_sync_band_windows: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            fragment_length: 128,
            max_fragment_attempts: 3,
            max_window_leaves: 100_000,
            block_batch_size: 64,
            max_concurrent_chain_requests: 16,
            request_timeout_ms: 10_000,
            fast_sync_band_windows: 100,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
