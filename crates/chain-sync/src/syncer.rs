// chain-sync/src/syncer.rs

//! Drives one sync session: reconcile the window, resolve the range of every
//! chain that needs fetching, then fetch the chains concurrently.

use crate::{
    config::SyncConfig,
    fragments::{FragmentReconciler, WindowLeaf},
    oracle::{ChainStore, PeerError, PeerTransport},
    params::{StageSelection, SyncParameters},
    peer::{tracked_request, PeerId, PeerRegistry},
    requests::{ChainRange, ChainRequestInfo, ChainRequestTracker},
    stage::{StageClassifier, SyncStage},
    SyncError, SyncResult,
};
use futures::stream::{self, StreamExt};
use ledger_core::{
    insert_chronologically, meets_minimum_gas_price, validate_block_header_chain_id,
    validate_block_header_signature, Block, BlockHeader, BlockNumber, ChainIndex, Timestamp,
};
use ledger_crypto::{Address, Hash};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A chain that could not be brought up to date
#[derive(Debug)]
pub struct ChainFailure {
    pub chain_idx: ChainIndex,
    pub error: SyncError,
}

/// Outcome of a session
#[derive(Debug)]
pub struct SyncReport {
    pub stage: SyncStage,
    pub window: Timestamp,
    /// No peer reduced to the consensus root and every known chain was fetched
    pub escalated: bool,
    pub chains_requested: Vec<ChainIndex>,
    /// Accepted blocks of all chains, ordered by timestamp
    pub chronological_blocks: Vec<Block>,
    pub failures: Vec<ChainFailure>,
}

impl SyncReport {
    fn new(params: &SyncParameters) -> Self {
        Self {
            stage: params.sync_stage(),
            window: params.timestamp_for_chronological_block_window(),
            escalated: false,
            chains_requested: Vec::new(),
            chronological_blocks: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn blocks_imported(&self) -> usize {
        self.chronological_blocks.len()
    }
}

/// Owner and parent the next block of a chain must have
#[derive(Debug, Clone, Default)]
struct ChainLink {
    owner: Option<Address>,
    parent: Option<Hash>,
}

impl ChainLink {
    fn check(&self, block: &Block) -> Result<(), String> {
        if let Some(owner) = self.owner {
            if block.header.chain_address != owner {
                return Err(format!(
                    "block {} belongs to {}, not {}",
                    block.number(),
                    block.header.chain_address,
                    owner
                ));
            }
        }
        if let Some(parent) = self.parent {
            if block.header.parent_hash != parent {
                return Err(format!("block {} does not extend its parent", block.number()));
            }
        }
        Ok(())
    }

    fn extend(&mut self, block: &Block) {
        self.owner.get_or_insert(block.header.chain_address);
        self.parent = Some(block.hash());
    }
}

/// Blocks of one chain that passed authentication but stay uncommitted until
/// the chain's window head is among them
#[derive(Debug)]
struct ChainProgress {
    committed: ChainLink,
    tip: ChainLink,
    expected_head: Option<WindowLeaf>,
    pending: Vec<Block>,
}

impl ChainProgress {
    fn resume(
        local_head: Option<&BlockHeader>,
        start_idx: BlockNumber,
        expected_head: Option<WindowLeaf>,
    ) -> Self {
        let committed = ChainLink {
            owner: local_head.map(|head| head.chain_address),
            parent: local_head
                .filter(|head| head.block_number.saturating_add(1) == start_idx)
                .map(BlockHeader::hash),
        };
        // A window head no newer than the stored head is already behind us
        let expected_head = expected_head
            .filter(|head| local_head.map_or(true, |local| local.timestamp < head.timestamp));

        Self {
            tip: committed.clone(),
            committed,
            expected_head,
            pending: Vec::new(),
        }
    }

    fn pending_len(&self) -> u64 {
        self.pending.len() as u64
    }

    fn awaiting_head(&self) -> bool {
        self.expected_head.is_some()
    }

    fn check_link(&self, block: &Block) -> Result<(), String> {
        self.tip.check(block)
    }

    /// Hold `block` back. Returns whether everything held may now be committed.
    fn stage(&mut self, block: Block) -> Result<bool, String> {
        let ready = match self.expected_head {
            None => true,
            Some(head) if block.hash() == head.hash => {
                self.expected_head = None;
                true
            }
            Some(head) if block.timestamp() > head.timestamp => {
                return Err(format!(
                    "block {} passes the window head at {} without matching it",
                    block.number(),
                    head.timestamp
                ));
            }
            Some(_) => false,
        };
        self.tip.extend(&block);
        self.pending.push(block);
        Ok(ready)
    }

    fn take_ready(&mut self) -> Vec<Block> {
        self.committed = self.tip.clone();
        std::mem::take(&mut self.pending)
    }

    /// Forget every uncommitted block
    fn rewind(&mut self) {
        self.pending.clear();
        self.tip = self.committed.clone();
    }
}

pub struct Syncer {
    store: Arc<dyn ChainStore>,
    transport: Arc<dyn PeerTransport>,
    registry: Arc<PeerRegistry>,
    config: SyncConfig,
    classifier: StageClassifier,
}

impl Syncer {
    pub fn new(
        store: Arc<dyn ChainStore>,
        transport: Arc<dyn PeerTransport>,
        registry: Arc<PeerRegistry>,
        config: SyncConfig,
    ) -> Self {
        let classifier = StageClassifier::from_config(&config);
        Self {
            store,
            transport,
            registry,
            config,
            classifier,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn classifier(&self) -> &StageClassifier {
        &self.classifier
    }

    pub fn reconciler(&self) -> FragmentReconciler<'_> {
        FragmentReconciler::new(
            self.store.as_ref(),
            self.transport.as_ref(),
            &self.registry,
            &self.config,
        )
    }

    /// Session against `consensus_root_hash` with the local head root and every
    /// registered peer in preference order
    pub async fn session(
        &self,
        timestamp_for_root_hash: Timestamp,
        consensus_root_hash: Hash,
        stage: StageSelection,
    ) -> SyncResult<SyncParameters> {
        SyncParameters::new(
            timestamp_for_root_hash,
            self.store.get_canonical_head_root_hash(),
            consensus_root_hash,
            self.registry.ranked_peers().await,
            stage,
            &self.classifier,
        )
    }

    pub async fn sync(&self, params: &SyncParameters) -> SyncResult<SyncReport> {
        let mut report = SyncReport::new(params);

        if !params.needs_reconciliation() {
            info!(window = report.window, "Local root matches consensus, nothing to sync");
            return Ok(report);
        }

        let outcome = match params.sync_stage() {
            SyncStage::Live => {
                debug!(window = report.window, "Live stage follows new blocks, skipping window sync");
                return Ok(report);
            }
            SyncStage::FastSync => self.reconciler().reconcile_window(params).await?,
            SyncStage::HistoricalFull => self.reconciler().list_window(params).await?,
        };
        report.escalated = outcome.is_escalated();
        let fast_sync = outcome.into_parameters();
        let replay_from_genesis = params.sync_stage() == SyncStage::HistoricalFull;
        let concurrency = self.config.max_concurrent_chain_requests.max(1);

        let tracker = Mutex::new(ChainRequestTracker::new());
        let tracker = &tracker;

        let resolved: Vec<(ChainIndex, SyncResult<ChainRange>)> =
            stream::iter(fast_sync.chain_idx_that_we_need().to_vec())
                .map(move |chain_idx| async move {
                    let start_idx = self.start_idx(chain_idx, replay_from_genesis);
                    let preferred = params.peers_to_sync_with()
                        [chain_idx % params.peers_to_sync_with().len()];
                    let range = self
                        .resolve_range(params, tracker, chain_idx, start_idx, preferred)
                        .await;
                    (chain_idx, range)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut ranges = HashMap::new();
        for (chain_idx, range) in resolved {
            match range {
                Ok(range) => {
                    ranges.insert(chain_idx, range);
                }
                Err(error) => {
                    warn!(chain_idx, error = %error, "Could not resolve chain range");
                    report.failures.push(ChainFailure { chain_idx, error });
                }
            }
        }

        let requests = fast_sync.into_chain_requests(params, &ranges);
        report.chains_requested = requests.iter().map(|request| request.chain_idx).collect();
        info!(
            stage = %report.stage,
            window = report.window,
            chains = requests.len(),
            escalated = report.escalated,
            "Fetching chains"
        );
        {
            let mut tracker = tracker.lock().await;
            for request in requests {
                tracker.insert(request);
            }
        }

        let fetches: Vec<(ChainIndex, Vec<Block>, SyncResult<()>)> =
            stream::iter(report.chains_requested.clone())
                .map(move |chain_idx| self.fetch_chain(params, tracker, chain_idx))
                .buffer_unordered(concurrency)
                .collect()
                .await;

        for (chain_idx, blocks, result) in fetches {
            for block in blocks {
                insert_chronologically(&mut report.chronological_blocks, block);
            }
            if let Err(error) = result {
                warn!(chain_idx, error = %error, "Chain sync failed");
                report.failures.push(ChainFailure { chain_idx, error });
            }
        }
        report.failures.sort_by_key(|failure| failure.chain_idx);

        info!(
            window = report.window,
            blocks = report.blocks_imported(),
            failures = report.failures.len(),
            "Sync session finished"
        );
        Ok(report)
    }

    fn start_idx(&self, chain_idx: ChainIndex, replay_from_genesis: bool) -> BlockNumber {
        if replay_from_genesis {
            0
        } else {
            self.store
                .get_chain_height(chain_idx)
                .map_or(0, |height| height + 1)
        }
    }

    /// Range of `chain_idx` still to fetch, with the peer that reported its
    /// head. Starts with `preferred` unless it was dropped.
    async fn resolve_range(
        &self,
        params: &SyncParameters,
        tracker: &Mutex<ChainRequestTracker>,
        chain_idx: ChainIndex,
        start_idx: BlockNumber,
        preferred: PeerId,
    ) -> SyncResult<ChainRange> {
        let peers = params.peers_to_sync_with();
        let mut peer = {
            let tracker = tracker.lock().await;
            if tracker.is_dropped(&preferred) {
                tracker
                    .eligible_peer(peers)
                    .ok_or(SyncError::ChainStalled { chain_idx, start_idx })?
            } else {
                preferred
            }
        };

        loop {
            let head = tracked_request(
                &self.registry,
                peer,
                self.config.request_timeout(),
                self.transport
                    .request_chain_head_height(peer, chain_idx, params.consensus_root_hash()),
            )
            .await;

            match head {
                Ok(end_idx) => {
                    return Ok(ChainRange {
                        peer,
                        start_idx,
                        end_idx,
                    })
                }
                Err(e) => {
                    warn!(chain_idx, %peer, error = %e, "Head height request failed");
                    peer = tracker
                        .lock()
                        .await
                        .reassign(chain_idx, peer, peers)
                        .map_err(|_| SyncError::ChainStalled { chain_idx, start_idx })?;
                }
            }
        }
    }

    async fn fetch_chain(
        &self,
        params: &SyncParameters,
        tracker: &Mutex<ChainRequestTracker>,
        chain_idx: ChainIndex,
    ) -> (ChainIndex, Vec<Block>, SyncResult<()>) {
        let mut accepted = Vec::new();
        let result = self
            .fetch_chain_into(params, tracker, chain_idx, &mut accepted)
            .await;
        tracker.lock().await.remove(chain_idx);
        (chain_idx, accepted, result)
    }

    async fn fetch_chain_into(
        &self,
        params: &SyncParameters,
        tracker: &Mutex<ChainRequestTracker>,
        chain_idx: ChainIndex,
        accepted: &mut Vec<Block>,
    ) -> SyncResult<()> {
        let first = tracker.lock().await.get(chain_idx).cloned();
        let Some(first) = first else {
            return Ok(());
        };
        let local_head = self.store.get_chain_head(chain_idx);
        let mut progress =
            ChainProgress::resume(local_head.as_ref(), first.start_idx, first.expected_head);

        loop {
            let request = tracker.lock().await.get(chain_idx).cloned();
            let Some(request) = request else {
                return Ok(());
            };
            let next_idx = request.start_idx + progress.pending_len();

            let step = if next_idx > request.end_idx {
                if !progress.awaiting_head() {
                    debug!(chain_idx, blocks = accepted.len(), "Chain up to date");
                    return Ok(());
                }
                Err(self
                    .reject_response(
                        request.peer,
                        format!("chain {} ends at block {} before its window head", chain_idx, request.end_idx),
                    )
                    .await)
            } else {
                match self.request_batch(&request, next_idx).await {
                    Ok(blocks) => self.apply_batch(tracker, &request, blocks, &mut progress, accepted).await,
                    Err(e) => Err(e),
                }
            };

            match step {
                Ok(()) => {}
                Err(e) if e.is_peer_failure() => {
                    warn!(chain_idx, peer = %request.peer, error = %e, "Block range request failed");
                    progress.rewind();
                    let peer = tracker
                        .lock()
                        .await
                        .reassign(chain_idx, request.peer, params.peers_to_sync_with())?;
                    // The failed peer's head height is not trusted either
                    let range = self
                        .resolve_range(params, tracker, chain_idx, request.start_idx, peer)
                        .await?;
                    tracker.lock().await.retarget(chain_idx, range.peer, range.end_idx);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next batch of a chain from `next_idx`, checked to be contiguous
    async fn request_batch(&self, request: &ChainRequestInfo, next_idx: BlockNumber) -> SyncResult<Vec<Block>> {
        let batch_size = self.config.block_batch_size.max(1);
        let end_idx = request
            .end_idx
            .min(next_idx.saturating_add(batch_size - 1));

        let blocks = tracked_request(
            &self.registry,
            request.peer,
            self.config.request_timeout(),
            self.transport
                .request_block_range(request.peer, request.chain_idx, next_idx, end_idx),
        )
        .await?;

        if let Err(reason) = check_batch(&blocks, next_idx, end_idx) {
            return Err(self.reject_response(request.peer, reason).await);
        }
        Ok(blocks)
    }

    /// Link, authenticate and stage each block, committing once the window
    /// head has been seen
    async fn apply_batch(
        &self,
        tracker: &Mutex<ChainRequestTracker>,
        request: &ChainRequestInfo,
        blocks: Vec<Block>,
        progress: &mut ChainProgress,
        accepted: &mut Vec<Block>,
    ) -> SyncResult<()> {
        for block in blocks {
            if let Err(reason) = progress.check_link(&block) {
                return Err(self.reject_response(request.peer, reason).await);
            }
            self.verify_block(request.chain_idx, &block)?;

            let ready = match progress.stage(block) {
                Ok(ready) => ready,
                Err(reason) => return Err(self.reject_response(request.peer, reason).await),
            };
            if ready {
                for block in progress.take_ready() {
                    self.store.persist_block(&block)?;
                    tracker.lock().await.advance(request.chain_idx, 1);
                    accepted.push(block);
                }
            }
        }
        Ok(())
    }

    /// Authenticate for this node's chain id, then apply the gas price gate
    fn verify_block(&self, chain_idx: ChainIndex, block: &Block) -> SyncResult<()> {
        validate_block_header_signature(&block.header)
            .and_then(|_| validate_block_header_chain_id(&block.header, self.config.chain_id))
            .and_then(|_| block.validate_contents())
            .map_err(|source| SyncError::Authentication {
                chain_idx,
                block_number: block.number(),
                source,
            })?;

        let required_gwei = self.store.get_required_min_gas_price(block.timestamp());
        if !meets_minimum_gas_price(block, required_gwei) {
            return Err(SyncError::BelowMinimumGasPrice {
                chain_idx,
                block_number: block.number(),
                required_gwei,
            });
        }
        Ok(())
    }

    async fn reject_response(&self, peer: PeerId, reason: String) -> SyncError {
        self.registry.record_failure(&peer).await;
        SyncError::PeerRequest {
            peer,
            source: PeerError::InvalidResponse(reason),
        }
    }
}

fn check_batch(blocks: &[Block], start_idx: BlockNumber, end_idx: BlockNumber) -> Result<(), String> {
    if blocks.is_empty() {
        return Err(format!("no blocks for range {}..={}", start_idx, end_idx));
    }
    if blocks.len() as u64 > end_idx - start_idx + 1 {
        return Err(format!(
            "{} blocks for range {}..={}",
            blocks.len(),
            start_idx,
            end_idx
        ));
    }
    for (expected, block) in (start_idx..).zip(blocks) {
        if block.number() != expected {
            return Err(format!("expected block {}, got {}", expected, block.number()));
        }
    }
    Ok(())
}
