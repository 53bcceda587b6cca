// chain-sync/src/lib.rs

//! Multi-chain synchronization
//!
//! This crate brings a node's account chains in line with the network's
//! consensus view:
//! - Sync stage classification and session parameters
//! - Hash fragment reconciliation of chronological block windows
//! - Per-chain block range requests with peer failover
//! - Peer health tracking and quality snapshots

pub mod config;
pub mod fragments;
pub mod oracle;
pub mod params;
pub mod peer;
pub mod requests;
pub mod snapshot;
pub mod stage;
pub mod syncer;

pub use config::SyncConfig;
pub use fragments::{
    window_root, FragmentReconciler, HashFragmentBundle, HashFragmentRequestHistory,
    ReconcileOutcome, WindowLeaf, WINDOW_LEAF_SIZE,
};
pub use oracle::{ChainStore, PeerError, PeerTransport, StorageError, StorageResult};
pub use params::{FastSyncParameters, StageSelection, SyncParameters};
pub use peer::{NodeAddress, PeerHealth, PeerId, PeerRecord, PeerRegistry};
pub use requests::{ChainRange, ChainRequestInfo, ChainRequestTracker};
pub use snapshot::{ConnectedNode, ConnectedNodesInfo};
pub use stage::{StageClassifier, SyncStage};
pub use syncer::{ChainFailure, SyncReport, Syncer};

use ledger_core::{BlockNumber, BlockchainError, ChainIndex, Gwei, Timestamp};

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Cannot start a sync session without peers")]
    EmptySessionPeers,

    #[error("Fragments of window {window} at offset {offset} do not recompose to their root")]
    FragmentMismatch { window: Timestamp, offset: usize },

    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("Peer {0} did not respond in time")]
    PeerUnresponsive(PeerId),

    #[error("Request to peer {peer} failed: {source}")]
    PeerRequest {
        peer: PeerId,
        #[source]
        source: PeerError,
    },

    #[error("No peer left to reconcile window {window}")]
    WindowStalled { window: Timestamp },

    #[error("No peer left to fetch chain {chain_idx} from block {start_idx}")]
    ChainStalled { chain_idx: ChainIndex, start_idx: BlockNumber },

    #[error("Block {block_number} of chain {chain_idx} failed authentication: {source}")]
    Authentication {
        chain_idx: ChainIndex,
        block_number: BlockNumber,
        #[source]
        source: BlockchainError,
    },

    #[error("Block {block_number} of chain {chain_idx} is below the minimum gas price of {required_gwei} gwei")]
    BelowMinimumGasPrice {
        chain_idx: ChainIndex,
        block_number: BlockNumber,
        required_gwei: Gwei,
    },

    #[error("Fast sync parameters are misaligned: {fragments} fragments for {chains} chains")]
    MismatchedFastSyncParameters { fragments: usize, chains: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Errors that should move a request to another peer rather than abort it
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            SyncError::PeerUnresponsive(_)
                | SyncError::PeerRequest { .. }
                | SyncError::FragmentMismatch { .. }
                | SyncError::InvalidFragment(_)
        )
    }
}
