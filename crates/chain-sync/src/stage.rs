// chain-sync/src/stage.rs

//! Sync stage classification by the age of the consensus root hash.

use crate::config::SyncConfig;
use ledger_core::{Timestamp, TIME_BETWEEN_HEAD_HASH_SAVE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How far behind the network a node is. Ordered from furthest to closest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncStage {
    /// Replay every window from genesis forward
    HistoricalFull,
    /// Reconcile recent windows by hash fragments and fetch only the chains that differ
    FastSync,
    /// Follow new blocks as they are produced
    Live,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStage::HistoricalFull => write!(f, "historical-full"),
            SyncStage::FastSync => write!(f, "fast-sync"),
            SyncStage::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageClassifier {
    fast_sync_band_windows: u64,
}

impl Default for StageClassifier {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl StageClassifier {
    /// A band narrower than one window is widened to one
    pub fn new(fast_sync_band_windows: u64) -> Self {
        Self {
            fast_sync_band_windows: fast_sync_band_windows.max(1),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.fast_sync_band_windows)
    }

    /// Stage for a root hash saved at `timestamp_for_root_hash`, as seen at `now`.
    /// Timestamps in the future count as age zero.
    pub fn classify_at(&self, timestamp_for_root_hash: Timestamp, now: Timestamp) -> SyncStage {
        let age = now.saturating_sub(timestamp_for_root_hash);
        let fast_sync_limit = self
            .fast_sync_band_windows
            .saturating_mul(TIME_BETWEEN_HEAD_HASH_SAVE);

        if age <= TIME_BETWEEN_HEAD_HASH_SAVE {
            SyncStage::Live
        } else if age <= fast_sync_limit {
            SyncStage::FastSync
        } else {
            SyncStage::HistoricalFull
        }
    }

    pub fn classify(&self, timestamp_for_root_hash: Timestamp) -> SyncStage {
        self.classify_at(timestamp_for_root_hash, current_timestamp())
    }
}

fn current_timestamp() -> Timestamp {
    chrono::Utc::now().timestamp().max(0) as Timestamp
}
