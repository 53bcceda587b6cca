// chain-sync/src/oracle.rs

//! Collaborators of a sync session: local chain storage and the peer transport.

use crate::{fragments::{HashFragmentBundle, WindowLeaf}, peer::PeerId};
use async_trait::async_trait;
use ledger_core::{Block, BlockHeader, BlockNumber, ChainIndex, Gwei, Timestamp};
use ledger_crypto::Hash;
use std::ops::Range;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Block {block_number} of chain {chain_idx} does not extend the stored chain")]
    NonContiguous { chain_idx: ChainIndex, block_number: BlockNumber },

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    #[error("Peer disconnected")]
    Disconnected,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Read and write access to the local chains
pub trait ChainStore: Send + Sync {
    fn get_canonical_head_root_hash(&self) -> Hash;

    /// Leaves of the chronological window at `window_timestamp`, clipped to `range`
    fn get_leaf_hashes(&self, window_timestamp: Timestamp, range: Range<usize>) -> Vec<WindowLeaf>;

    /// Header of the highest stored block of a chain, `None` for an empty chain
    fn get_chain_head(&self, chain_idx: ChainIndex) -> Option<BlockHeader>;

    fn get_chain_height(&self, chain_idx: ChainIndex) -> Option<BlockNumber> {
        self.get_chain_head(chain_idx).map(|head| head.block_number)
    }

    /// Persist an authenticated block
    fn persist_block(&self, block: &Block) -> StorageResult<()>;

    fn get_required_min_gas_price(&self, timestamp: Timestamp) -> Gwei;
}

/// Requests to remote peers. Every call is a suspension point and may be
/// abandoned by the caller's timeout.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Up to `length` fragments of a window starting at leaf `offset`
    async fn request_fragments(
        &self,
        peer: PeerId,
        window_timestamp: Timestamp,
        offset: usize,
        length: usize,
    ) -> Result<HashFragmentBundle, PeerError>;

    /// Blocks `start_idx..=end_idx` of a chain, ascending
    async fn request_block_range(
        &self,
        peer: PeerId,
        chain_idx: ChainIndex,
        start_idx: BlockNumber,
        end_idx: BlockNumber,
    ) -> Result<Vec<Block>, PeerError>;

    /// Height of a chain's head as of the root `head_root_hash`
    async fn request_chain_head_height(
        &self,
        peer: PeerId,
        chain_idx: ChainIndex,
        head_root_hash: Hash,
    ) -> Result<BlockNumber, PeerError>;
}
