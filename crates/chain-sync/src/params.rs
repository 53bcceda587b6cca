// chain-sync/src/params.rs

//! Negotiated state of a sync session.

use crate::{
    fragments::WindowLeaf,
    peer::PeerId,
    requests::{ChainRange, ChainRequestInfo},
    stage::{StageClassifier, SyncStage},
    SyncError, SyncResult,
};
use ledger_core::{chronological_window_for_root, ChainIndex, Timestamp};
use ledger_crypto::Hash;
use std::collections::HashMap;

/// Whether the session stage is classified or imposed by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageSelection {
    #[default]
    Computed,
    Forced(SyncStage),
}

/// One sync session: what window, what target, with whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParameters {
    timestamp_for_root_hash: Timestamp,
    timestamp_for_chronological_block_window: Timestamp,
    sync_stage: SyncStage,
    local_root_hash: Hash,
    consensus_root_hash: Hash,
    peers_to_sync_with: Vec<PeerId>,
}

impl SyncParameters {
    /// `peers_to_sync_with` is in preference order; repeated peers are ignored
    pub fn new(
        timestamp_for_root_hash: Timestamp,
        local_root_hash: Hash,
        consensus_root_hash: Hash,
        peers_to_sync_with: Vec<PeerId>,
        stage: StageSelection,
        classifier: &StageClassifier,
    ) -> SyncResult<Self> {
        if peers_to_sync_with.is_empty() {
            return Err(SyncError::EmptySessionPeers);
        }

        let mut peers = Vec::with_capacity(peers_to_sync_with.len());
        for peer in peers_to_sync_with {
            if !peers.contains(&peer) {
                peers.push(peer);
            }
        }

        let sync_stage = match stage {
            StageSelection::Computed => classifier.classify(timestamp_for_root_hash),
            StageSelection::Forced(stage) => stage,
        };

        Ok(Self {
            timestamp_for_root_hash,
            timestamp_for_chronological_block_window: chronological_window_for_root(
                timestamp_for_root_hash,
            ),
            sync_stage,
            local_root_hash,
            consensus_root_hash,
            peers_to_sync_with: peers,
        })
    }

    pub fn timestamp_for_root_hash(&self) -> Timestamp {
        self.timestamp_for_root_hash
    }

    /// The block window whose contents hash into the root
    pub fn timestamp_for_chronological_block_window(&self) -> Timestamp {
        self.timestamp_for_chronological_block_window
    }

    pub fn sync_stage(&self) -> SyncStage {
        self.sync_stage
    }

    pub fn local_root_hash(&self) -> Hash {
        self.local_root_hash
    }

    pub fn consensus_root_hash(&self) -> Hash {
        self.consensus_root_hash
    }

    pub fn peers_to_sync_with(&self) -> &[PeerId] {
        &self.peers_to_sync_with
    }

    pub fn needs_reconciliation(&self) -> bool {
        self.local_root_hash != self.consensus_root_hash
    }
}

/// Chains to fetch after reconciling a window, each paired with the fragment
/// that shows it differs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastSyncParameters {
    expected_block_hash_fragments: Vec<Vec<u8>>,
    chain_idx_that_we_need: Vec<ChainIndex>,
}

impl FastSyncParameters {
    pub fn new(
        expected_block_hash_fragments: Vec<Vec<u8>>,
        chain_idx_that_we_need: Vec<ChainIndex>,
    ) -> SyncResult<Self> {
        if expected_block_hash_fragments.len() != chain_idx_that_we_need.len() {
            return Err(SyncError::MismatchedFastSyncParameters {
                fragments: expected_block_hash_fragments.len(),
                chains: chain_idx_that_we_need.len(),
            });
        }
        Ok(Self {
            expected_block_hash_fragments,
            chain_idx_that_we_need,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Chains fetched in full, with an empty fragment as their proof
    pub fn without_proofs(chain_idx_that_we_need: Vec<ChainIndex>) -> Self {
        Self {
            expected_block_hash_fragments: vec![Vec::new(); chain_idx_that_we_need.len()],
            chain_idx_that_we_need,
        }
    }

    pub fn expected_block_hash_fragments(&self) -> &[Vec<u8>] {
        &self.expected_block_hash_fragments
    }

    pub fn chain_idx_that_we_need(&self) -> &[ChainIndex] {
        &self.chain_idx_that_we_need
    }

    pub fn len(&self) -> usize {
        self.chain_idx_that_we_need.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain_idx_that_we_need.is_empty()
    }

    /// `(chain index, fragment)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (ChainIndex, &[u8])> + '_ {
        self.chain_idx_that_we_need
            .iter()
            .copied()
            .zip(self.expected_block_hash_fragments.iter().map(Vec::as_slice))
    }

    /// `(chain index, window head)` pairs. Chains fetched without proof, or
    /// empty in the window, have no head to check against.
    pub fn expected_heads(&self) -> impl Iterator<Item = (ChainIndex, Option<WindowLeaf>)> + '_ {
        self.iter().map(|(chain_idx, fragment)| {
            let head = WindowLeaf::from_fragment(fragment)
                .ok()
                .filter(|leaf| !leaf.hash.is_zero());
            (chain_idx, head)
        })
    }

    /// One request descriptor per needed chain that has a known range, anchored
    /// at the session's root and carrying the chain's window head. Chains
    /// without a range or with nothing left to fetch are skipped.
    pub fn into_chain_requests(
        self,
        params: &SyncParameters,
        ranges: &HashMap<ChainIndex, ChainRange>,
    ) -> Vec<ChainRequestInfo> {
        self.expected_heads()
            .filter_map(|(chain_idx, expected_head)| {
                let range = ranges.get(&chain_idx)?;
                let request = ChainRequestInfo::open(
                    range.peer,
                    chain_idx,
                    params.timestamp_for_root_hash(),
                    params.consensus_root_hash(),
                    range.start_idx,
                    range.end_idx,
                )
                .with_expected_head(expected_head);
                (!request.is_complete()).then_some(request)
            })
            .collect()
    }
}
