// chain-sync/src/fragments.rs

//! Hash fragment reconciliation of one chronological window.
//!
//! A window's leaves are the chain heads recorded for it, leaf `i` belonging
//! to chain `i`. Instead of downloading a whole window, leaves are requested
//! from a peer in segments of `fragment_length` and compared with the local
//! ones. Once the leaves received so far hash to the consensus root, only the
//! chains whose leaf differed need to be fetched.

use crate::{
    config::SyncConfig,
    oracle::{ChainStore, PeerTransport},
    params::{FastSyncParameters, SyncParameters},
    peer::{tracked_request, PeerId, PeerRegistry},
    SyncError, SyncResult,
};
use ledger_core::{ChainIndex, Timestamp};
use ledger_crypto::{hash::keccak_concat, merkle::empty_root, Hash, MerkleTree, HASH_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Encoded size of a leaf: big-endian timestamp followed by the hash
pub const WINDOW_LEAF_SIZE: usize = 8 + HASH_SIZE;

/// One chain head of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowLeaf {
    pub timestamp: Timestamp,
    pub hash: Hash,
}

impl WindowLeaf {
    pub fn new(timestamp: Timestamp, hash: Hash) -> Self {
        Self { timestamp, hash }
    }

    pub fn to_fragment(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(WINDOW_LEAF_SIZE);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(self.hash.as_bytes());
        bytes
    }

    pub fn from_fragment(fragment: &[u8]) -> SyncResult<Self> {
        if fragment.len() != WINDOW_LEAF_SIZE {
            return Err(SyncError::InvalidFragment(format!(
                "expected {} bytes, got {}",
                WINDOW_LEAF_SIZE,
                fragment.len()
            )));
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&fragment[..8]);
        let hash = Hash::from_slice(&fragment[8..])
            .map_err(|e| SyncError::InvalidFragment(e.to_string()))?;

        Ok(Self::new(u64::from_be_bytes(timestamp), hash))
    }
}

/// Root committing to an ordered list of leaves
pub fn window_root(leaves: &[WindowLeaf]) -> Hash {
    let fragments: Vec<Vec<u8>> = leaves.iter().map(WindowLeaf::to_fragment).collect();
    MerkleTree::root_of(&fragments)
}

/// A peer's answer to one fragment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashFragmentBundle {
    pub fragments: Vec<Vec<u8>>,
    pub root_hash_of_the_full_hashes: Hash,
}

impl HashFragmentBundle {
    /// Bundle over `fragments`, with the digest computed locally
    pub fn new(fragments: Vec<Vec<u8>>) -> Self {
        let root_hash_of_the_full_hashes = keccak_concat(&fragments);
        Self {
            fragments,
            root_hash_of_the_full_hashes,
        }
    }

    pub fn from_leaves(leaves: &[WindowLeaf]) -> Self {
        Self::new(leaves.iter().map(WindowLeaf::to_fragment).collect())
    }

    /// The in-order concatenation of the fragments must hash to the declared digest
    pub fn is_valid(&self) -> bool {
        keccak_concat(&self.fragments) == self.root_hash_of_the_full_hashes
    }
}

/// State of one fragment exchange with one peer
#[derive(Debug, Clone)]
pub struct HashFragmentRequestHistory {
    pub timestamp: Timestamp,
    pub fragment_length: usize,
    pub hexary_trie_root_hash_of_complete_window: Hash,
    /// Local leaves covered by the segments requested so far. Requests carry
    /// only an offset and a length, so this is a record of the exchange and is
    /// never sent to the peer.
    pub local_hashes_sent_to_peer: Vec<WindowLeaf>,
}

impl HashFragmentRequestHistory {
    pub fn new(timestamp: Timestamp, fragment_length: usize, window_root: Hash) -> Self {
        Self {
            timestamp,
            fragment_length,
            hexary_trie_root_hash_of_complete_window: window_root,
            local_hashes_sent_to_peer: Vec::new(),
        }
    }

    /// Record the local leaves of the segment at `offset` that were not
    /// disclosed before. Returns how many were added.
    pub fn disclose(&mut self, local_leaves: &[WindowLeaf], offset: usize) -> usize {
        let already_sent = self.local_hashes_sent_to_peer.len();
        let segment_end = offset.saturating_add(self.fragment_length).min(local_leaves.len());
        if segment_end <= already_sent {
            return 0;
        }

        self.local_hashes_sent_to_peer
            .extend_from_slice(&local_leaves[already_sent..segment_end]);
        segment_end - already_sent
    }

    /// Whether `leaves` reduce to the window's target root
    pub fn reaches_target(&self, received_fragments: &[Vec<u8>]) -> bool {
        MerkleTree::root_of(received_fragments) == self.hexary_trie_root_hash_of_complete_window
    }
}

/// Result of reconciling one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A peer's leaves reduced to the target root; only the listed chains differ
    Reconciled(FastSyncParameters),
    /// No peer reduced to the target root; every listed chain is fetched in full
    Escalated(FastSyncParameters),
}

impl ReconcileOutcome {
    pub fn is_escalated(&self) -> bool {
        matches!(self, ReconcileOutcome::Escalated(_))
    }

    pub fn into_parameters(self) -> FastSyncParameters {
        match self {
            ReconcileOutcome::Reconciled(params) | ReconcileOutcome::Escalated(params) => params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeMode {
    /// Keep only the chains whose leaf differs from the local one
    Differences,
    /// Keep every chain of the window
    Everything,
}

enum PeerExchange {
    Matched(FastSyncParameters),
    Diverged { leaves_seen: usize },
    /// Kept sending full segments past `max_window_leaves`
    Overran,
}

/// Runs fragment exchanges for one window against the session peers
pub struct FragmentReconciler<'a> {
    store: &'a dyn ChainStore,
    transport: &'a dyn PeerTransport,
    registry: &'a PeerRegistry,
    config: &'a SyncConfig,
}

impl<'a> FragmentReconciler<'a> {
    pub fn new(
        store: &'a dyn ChainStore,
        transport: &'a dyn PeerTransport,
        registry: &'a PeerRegistry,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            registry,
            config,
        }
    }

    /// Find the chains of the session's window that differ from the consensus view
    pub async fn reconcile_window(&self, params: &SyncParameters) -> SyncResult<ReconcileOutcome> {
        self.run(params, ExchangeMode::Differences).await
    }

    /// List every chain of the session's window, verified against the
    /// consensus root when a peer can reduce to it
    pub async fn list_window(&self, params: &SyncParameters) -> SyncResult<ReconcileOutcome> {
        self.run(params, ExchangeMode::Everything).await
    }

    async fn run(&self, params: &SyncParameters, mode: ExchangeMode) -> SyncResult<ReconcileOutcome> {
        let window = params.timestamp_for_chronological_block_window();
        let target = params.consensus_root_hash();
        let local_leaves = self.store.get_leaf_hashes(window, 0..usize::MAX);

        if target == empty_root() {
            debug!(window, "Empty consensus window");
            return Ok(ReconcileOutcome::Reconciled(FastSyncParameters::empty()));
        }
        if mode == ExchangeMode::Differences && window_root(&local_leaves) == target {
            debug!(window, "Local window already matches consensus");
            return Ok(ReconcileOutcome::Reconciled(FastSyncParameters::empty()));
        }

        let mut answered = false;
        let mut known_chains = local_leaves.len();

        for &peer in params.peers_to_sync_with() {
            match self.exchange(peer, window, target, &local_leaves, mode).await {
                Ok(PeerExchange::Matched(fast_sync)) => {
                    info!(
                        window,
                        %peer,
                        chains = fast_sync.len(),
                        "Reconciled window"
                    );
                    return Ok(ReconcileOutcome::Reconciled(fast_sync));
                }
                Ok(PeerExchange::Diverged { leaves_seen }) => {
                    warn!(window, %peer, leaves_seen, "Peer cannot reduce to the consensus root");
                    answered = true;
                    known_chains = known_chains.max(leaves_seen);
                }
                Ok(PeerExchange::Overran) => {
                    warn!(
                        window,
                        %peer,
                        limit = self.config.max_window_leaves,
                        "Peer exceeded the window size limit"
                    );
                    answered = true;
                }
                Err(e) => {
                    warn!(window, %peer, error = %e, "Dropping peer for this window");
                }
            }
        }

        if !answered {
            return Err(SyncError::WindowStalled { window });
        }

        warn!(window, chains = known_chains, "Escalating window to a full range fetch");
        Ok(ReconcileOutcome::Escalated(FastSyncParameters::without_proofs(
            (0..known_chains).collect(),
        )))
    }

    async fn exchange(
        &self,
        peer: PeerId,
        window: Timestamp,
        target: Hash,
        local_leaves: &[WindowLeaf],
        mode: ExchangeMode,
    ) -> SyncResult<PeerExchange> {
        let fragment_length = self.config.fragment_length.max(1);
        let mut history = HashFragmentRequestHistory::new(window, fragment_length, target);
        let mut received: Vec<Vec<u8>> = Vec::new();
        let mut fragments_needed = Vec::new();
        let mut chains_needed: Vec<ChainIndex> = Vec::new();
        let mut failed_attempts = 0u32;

        loop {
            let offset = received.len();
            history.disclose(local_leaves, offset);

            let bundle = tracked_request(
                self.registry,
                peer,
                self.config.request_timeout(),
                self.transport.request_fragments(peer, window, offset, fragment_length),
            )
            .await?;

            if let Some(reason) = bundle_rejection(&bundle, fragment_length) {
                failed_attempts += 1;
                self.registry.record_failure(&peer).await;
                debug!(window, %peer, offset, failed_attempts, reason, "Rejected fragment bundle");
                if failed_attempts >= self.config.max_fragment_attempts {
                    return Err(SyncError::FragmentMismatch { window, offset });
                }
                continue;
            }

            let segment_len = bundle.fragments.len();
            for (i, fragment) in bundle.fragments.into_iter().enumerate() {
                let chain_idx = offset + i;
                let leaf = WindowLeaf::from_fragment(&fragment)?;
                let differs = local_leaves.get(chain_idx) != Some(&leaf);
                if differs || mode == ExchangeMode::Everything {
                    chains_needed.push(chain_idx);
                    fragments_needed.push(fragment.clone());
                }
                received.push(fragment);
            }

            if history.reaches_target(&received) {
                if mode == ExchangeMode::Everything {
                    // Chains only we know of are fetched without proof
                    for chain_idx in received.len()..local_leaves.len() {
                        chains_needed.push(chain_idx);
                        fragments_needed.push(Vec::new());
                    }
                }
                return Ok(PeerExchange::Matched(FastSyncParameters::new(
                    fragments_needed,
                    chains_needed,
                )?));
            }

            if segment_len < fragment_length {
                return Ok(PeerExchange::Diverged {
                    leaves_seen: received.len(),
                });
            }
            if received.len() >= self.config.max_window_leaves {
                self.registry.record_failure(&peer).await;
                return Ok(PeerExchange::Overran);
            }
        }
    }
}

/// Why a bundle cannot be used, if it cannot
fn bundle_rejection(bundle: &HashFragmentBundle, fragment_length: usize) -> Option<&'static str> {
    if !bundle.is_valid() {
        Some("digest mismatch")
    } else if bundle.fragments.len() > fragment_length {
        Some("oversized segment")
    } else if bundle.fragments.iter().any(|f| f.len() != WINDOW_LEAF_SIZE) {
        Some("malformed leaf")
    } else {
        None
    }
}
