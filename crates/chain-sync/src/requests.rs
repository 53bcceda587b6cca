// chain-sync/src/requests.rs

//! Bookkeeping of per-chain block range requests.

use crate::{fragments::WindowLeaf, peer::PeerId, SyncError, SyncResult};
use ledger_core::{BlockNumber, ChainIndex, Timestamp};
use ledger_crypto::Hash;
use std::collections::{BTreeMap, HashSet};

/// Range of a chain still to fetch and the peer asked for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRange {
    pub peer: PeerId,
    pub start_idx: BlockNumber,
    pub end_idx: BlockNumber,
}

/// Fetch descriptor of one chain, anchored to a consensus root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRequestInfo {
    pub peer: PeerId,
    pub chain_idx: ChainIndex,
    pub head_root_timestamp: Timestamp,
    pub head_root_hash: Hash,
    /// Next height to fetch
    pub start_idx: BlockNumber,
    /// Last height to fetch, inclusive
    pub end_idx: BlockNumber,
    /// The chain's head as recorded in the reconciled window. The fetched range
    /// must contain it before anything below it is committed.
    pub expected_head: Option<WindowLeaf>,
}

impl ChainRequestInfo {
    pub fn open(
        peer: PeerId,
        chain_idx: ChainIndex,
        head_root_timestamp: Timestamp,
        head_root_hash: Hash,
        start_idx: BlockNumber,
        end_idx: BlockNumber,
    ) -> Self {
        Self {
            peer,
            chain_idx,
            head_root_timestamp,
            head_root_hash,
            start_idx,
            end_idx,
            expected_head: None,
        }
    }

    pub fn with_expected_head(mut self, expected_head: Option<WindowLeaf>) -> Self {
        self.expected_head = expected_head;
        self
    }

    /// Record `n` authenticated blocks from `start_idx` on
    pub fn advance(&mut self, n: u64) {
        self.start_idx = self.start_idx.saturating_add(n);
    }

    pub fn is_complete(&self) -> bool {
        self.start_idx > self.end_idx
    }

    /// Blocks still to fetch
    pub fn remaining(&self) -> u64 {
        if self.is_complete() {
            0
        } else {
            self.end_idx - self.start_idx + 1
        }
    }
}

/// Open descriptors of a session, one per chain, and the peers dropped from it
#[derive(Debug, Default)]
pub struct ChainRequestTracker {
    requests: BTreeMap<ChainIndex, ChainRequestInfo>,
    dropped_peers: HashSet<PeerId>,
}

impl ChainRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a descriptor, replacing any previous one for the same chain
    pub fn insert(&mut self, request: ChainRequestInfo) {
        self.requests.insert(request.chain_idx, request);
    }

    pub fn get(&self, chain_idx: ChainIndex) -> Option<&ChainRequestInfo> {
        self.requests.get(&chain_idx)
    }

    /// Advance a chain's descriptor, returning the updated copy
    pub fn advance(&mut self, chain_idx: ChainIndex, n: u64) -> Option<ChainRequestInfo> {
        let request = self.requests.get_mut(&chain_idx)?;
        request.advance(n);
        Some(request.clone())
    }

    /// Point a chain's descriptor at `peer` with a new last height
    pub fn retarget(&mut self, chain_idx: ChainIndex, peer: PeerId, end_idx: BlockNumber) {
        if let Some(request) = self.requests.get_mut(&chain_idx) {
            request.peer = peer;
            request.end_idx = end_idx;
        }
    }

    pub fn remove(&mut self, chain_idx: ChainIndex) -> Option<ChainRequestInfo> {
        self.requests.remove(&chain_idx)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_dropped(&self, peer: &PeerId) -> bool {
        self.dropped_peers.contains(peer)
    }

    /// First session peer that has not been dropped
    pub fn eligible_peer(&self, session_peers: &[PeerId]) -> Option<PeerId> {
        session_peers
            .iter()
            .copied()
            .find(|peer| !self.dropped_peers.contains(peer))
    }

    /// Drop `failed_peer` for the rest of the session and move every
    /// descriptor it held to the next eligible peer at the same `start_idx`.
    /// Returns the peer now serving `chain_idx`.
    pub fn reassign(
        &mut self,
        chain_idx: ChainIndex,
        failed_peer: PeerId,
        session_peers: &[PeerId],
    ) -> SyncResult<PeerId> {
        self.dropped_peers.insert(failed_peer);

        let current = self
            .requests
            .get(&chain_idx)
            .map(|request| (request.peer, request.start_idx));

        let replacement = self.eligible_peer(session_peers);
        if let Some(replacement) = replacement {
            for request in self.requests.values_mut().filter(|r| r.peer == failed_peer) {
                tracing::debug!(
                    chain_idx = request.chain_idx,
                    from = %failed_peer,
                    to = %replacement,
                    start_idx = request.start_idx,
                    "Reassigned chain request"
                );
                request.peer = replacement;
            }
        }

        match current {
            // Already moved off the failed peer by an earlier reassignment
            Some((peer, _)) if peer != failed_peer && !self.is_dropped(&peer) => Ok(peer),
            Some((_, start_idx)) => replacement.ok_or(SyncError::ChainStalled { chain_idx, start_idx }),
            None => replacement.ok_or(SyncError::ChainStalled { chain_idx, start_idx: 0 }),
        }
    }
}
