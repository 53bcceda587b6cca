mod common;

use chain_sync::{
    ChainStore, ConnectedNodesInfo, FragmentReconciler, PeerId, ReconcileOutcome, StageClassifier,
    StageSelection, SyncConfig, SyncError, SyncParameters, SyncStage, Syncer,
};
use common::{registry_with, Behavior, MemoryStore, Network, ScriptedTransport};
use ledger_core::BlockchainError;
use ledger_crypto::{merkle::empty_root, Hash};
use std::sync::Arc;

const ROOT_TIMESTAMP: u64 = 100_000;

fn config() -> SyncConfig {
    SyncConfig {
        fragment_length: 4,
        max_fragment_attempts: 2,
        block_batch_size: 2,
        max_concurrent_chain_requests: 3,
        request_timeout_ms: 500,
        ..SyncConfig::default()
    }
}

fn session(store: &MemoryStore, consensus: Hash, peers: &[PeerId], stage: SyncStage) -> SyncParameters {
    SyncParameters::new(
        ROOT_TIMESTAMP,
        store.get_canonical_head_root_hash(),
        consensus,
        peers.to_vec(),
        StageSelection::Forced(stage),
        &StageClassifier::default(),
    )
    .unwrap()
}

fn peers(n: u8) -> Vec<PeerId> {
    (1..=n).map(|i| PeerId::new([i; 32])).collect()
}

#[tokio::test]
async fn test_fast_sync_fetches_only_divergent_chains() {
    let network = Network::build(6, 5);
    let store = Arc::new(network.local_store(&[5, 5, 3, 5, 0, 5]));
    let peers = peers(2);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport.clone(), registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert!(!report.escalated);
    assert_eq!(report.chains_requested, vec![2, 4]);
    assert_eq!(report.blocks_imported(), 2 + 5);
    assert_eq!(store.chain(2), network.chains[2]);
    assert_eq!(store.chain(4), network.chains[4]);
    assert_eq!(store.leaves(), network.leaves());
    assert!(report
        .chronological_blocks
        .windows(2)
        .all(|w| w[0].timestamp() <= w[1].timestamp()));
}

#[tokio::test]
async fn test_single_leaf_divergence_is_localized() {
    let network = Network::build(8, 5);
    let store = network.local_store(&[5, 5, 5, 5, 5, 4, 5, 5]);
    let peers = peers(1);
    let transport = ScriptedTransport::new(&network, &[]);
    let registry = registry_with(&peers).await;
    let config = config();

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let outcome = reconciler.reconcile_window(&params).await.unwrap();

    let ReconcileOutcome::Reconciled(fast) = outcome else {
        panic!("window should reconcile");
    };
    assert_eq!(fast.chain_idx_that_we_need(), &[5]);
    assert_eq!(fast.expected_block_hash_fragments()[0], network.leaves()[5].to_fragment());
    // Two segments of four leaves
    assert_eq!(transport.fragment_requests(), 2);
}

#[tokio::test]
async fn test_matching_root_needs_no_requests() {
    let network = Network::build(3, 2);
    let store = Arc::new(network.synced_store());
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport.clone(), registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    assert!(!params.needs_reconciliation());

    let report = syncer.sync(&params).await.unwrap();
    assert!(report.is_complete());
    assert!(report.chains_requested.is_empty());
    assert_eq!(transport.fragment_requests(), 0);
    assert_eq!(transport.block_requests(), 0);
}

#[tokio::test]
async fn test_empty_consensus_window_reconciles_trivially() {
    let network = Network::build(2, 2);
    let store = network.local_store(&[1, 2]);
    let peers = peers(1);
    let transport = ScriptedTransport::new(&network, &[]);
    let registry = registry_with(&peers).await;
    let config = config();

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, empty_root(), &peers, SyncStage::FastSync);
    let outcome = reconciler.reconcile_window(&params).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Reconciled(Default::default()));
    assert_eq!(transport.fragment_requests(), 0);
}

#[tokio::test]
async fn test_disconnected_peer_fails_over() {
    let network = Network::build(4, 4);
    let store = Arc::new(network.local_store(&[4, 1, 4, 2]));
    let peers = peers(2);
    let transport = Arc::new(ScriptedTransport::new(&network, &[(peers[0], Behavior::Disconnected)]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry.clone(), config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(report.chains_requested, vec![1, 3]);
    assert_eq!(store.leaves(), network.leaves());

    let bad = registry.health(&peers[0]).await.unwrap();
    assert!(bad.failed_requests() >= 1);
    assert_eq!(registry.ranked_peers().await[0], peers[1]);

    let snapshot = ConnectedNodesInfo::generate(&registry).await;
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.to_json().unwrap().contains("\"failed_requests\""));
}

#[tokio::test]
async fn test_corrupt_fragments_then_honest_peer() {
    let network = Network::build(5, 3);
    let store = network.local_store(&[3, 3, 2, 3, 3]);
    let peers = peers(2);
    let transport = ScriptedTransport::new(&network, &[(peers[0], Behavior::CorruptFragments)]);
    let registry = registry_with(&peers).await;
    let config = config();

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let outcome = reconciler.reconcile_window(&params).await.unwrap();

    assert_eq!(outcome.into_parameters().chain_idx_that_we_need(), &[2]);
    // Two rejected bundles from the first peer, two segments from the second
    assert_eq!(transport.fragment_requests(), 4);
    assert_eq!(registry.health(&peers[0]).await.unwrap().failed_requests(), 2);
}

#[tokio::test]
async fn test_unreachable_peers_stall_window() {
    let network = Network::build(3, 2);
    let store = network.local_store(&[2, 1, 2]);
    let peers = peers(2);
    let transport = ScriptedTransport::new(
        &network,
        &[(peers[0], Behavior::Disconnected), (peers[1], Behavior::CorruptFragments)],
    );
    let registry = registry_with(&peers).await;
    let config = config();

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);

    assert!(matches!(
        reconciler.reconcile_window(&params).await,
        Err(SyncError::WindowStalled { window }) if window == params.timestamp_for_chronological_block_window()
    ));
}

#[tokio::test]
async fn test_divergent_peers_escalate_window() {
    let network = Network::build(3, 2);
    let store = network.local_store(&[2, 1, 2]);
    let peers = peers(1);
    let transport = ScriptedTransport::new(&network, &[(peers[0], Behavior::Divergent)]);
    let registry = registry_with(&peers).await;
    let config = config();

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let outcome = reconciler.reconcile_window(&params).await.unwrap();

    assert!(outcome.is_escalated());
    assert_eq!(outcome.into_parameters().chain_idx_that_we_need(), &[0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_peer_times_out() {
    let network = Network::build(3, 3);
    let store = Arc::new(network.local_store(&[3, 0, 3]));
    let peers = peers(2);
    let transport = Arc::new(ScriptedTransport::new(&network, &[(peers[0], Behavior::Hang)]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry.clone(), config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(store.chain(1), network.chains[1]);
    assert!(registry.health(&peers[0]).await.unwrap().failed_requests() >= 1);
}

#[tokio::test]
async fn test_forged_block_is_never_persisted() {
    let mut network = Network::build(3, 5);
    network.forge_block(1, 3);
    let store = Arc::new(network.local_store(&[5, 1, 3]));
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].chain_idx, 1);
    assert!(matches!(
        report.failures[0].error,
        SyncError::Authentication { chain_idx: 1, block_number: 3, .. }
    ));
    // Nothing below the window head is committed once the chain fails
    assert_eq!(store.chain(1).len(), 1);
    // The other chain completed
    assert_eq!(store.chain(2), network.chains[2]);
}

#[tokio::test]
async fn test_underpriced_block_rejected_by_policy() {
    let mut network = Network::build(2, 3);
    network.underprice_block(0, 2);
    let store = Arc::new(network.local_store(&[0, 3]));
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert!(matches!(
        report.failures[0].error,
        SyncError::BelowMinimumGasPrice { chain_idx: 0, block_number: 2, required_gwei: 1 }
    ));
    assert!(store.chain(0).is_empty());
}

#[tokio::test]
async fn test_historical_full_replays_every_chain() {
    let network = Network::build(3, 3);
    let store = Arc::new(network.local_store(&[3, 1, 2]));
    let peers = peers(2);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::HistoricalFull);
    let report = syncer.sync(&params).await.unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(report.chains_requested, vec![0, 1, 2]);
    assert_eq!(report.blocks_imported(), 9);
    assert_eq!(store.leaves(), network.leaves());
}

#[tokio::test]
async fn test_live_stage_leaves_window_alone() {
    let network = Network::build(2, 2);
    let store = Arc::new(network.local_store(&[1, 1]));
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport.clone(), registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::Live);
    let report = syncer.sync(&params).await.unwrap();

    assert_eq!(report.stage, SyncStage::Live);
    assert_eq!(transport.fragment_requests(), 0);
}

#[tokio::test]
async fn test_session_uses_registry_and_store() {
    let network = Network::build(2, 2);
    let store = Arc::new(network.local_store(&[2, 1]));
    let peers = peers(3);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = syncer
        .session(ROOT_TIMESTAMP, network.root(), StageSelection::Forced(SyncStage::FastSync))
        .await
        .unwrap();

    assert_eq!(params.peers_to_sync_with(), peers.as_slice());
    assert_eq!(params.local_root_hash(), chain_sync::window_root(&store.leaves()));
    assert!(params.needs_reconciliation());

    let empty = Syncer::new(
        store.clone(),
        Arc::new(ScriptedTransport::new(&network, &[])),
        Arc::new(chain_sync::PeerRegistry::new()),
        config(),
    );
    assert!(matches!(
        empty.session(ROOT_TIMESTAMP, network.root(), StageSelection::Computed).await,
        Err(SyncError::EmptySessionPeers)
    ));
}

#[tokio::test]
async fn test_swapped_chain_is_refetched_from_honest_peer() {
    let network = Network::build(2, 3);
    let store = Arc::new(network.local_store(&[0, 3]));
    let peers = peers(2);
    let transport = Arc::new(ScriptedTransport::new(&network, &[(peers[0], Behavior::SwapChains)]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry.clone(), config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(report.chains_requested, vec![0]);
    assert_eq!(report.blocks_imported(), 3);
    assert_eq!(store.chain(0), network.chains[0]);
    assert_eq!(store.leaves(), network.leaves());
    assert!(registry.health(&peers[0]).await.unwrap().failed_requests() >= 1);
}

#[tokio::test]
async fn test_swapped_chain_without_honest_peer_stalls() {
    let network = Network::build(2, 3);
    let store = Arc::new(network.local_store(&[1, 3]));
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[(peers[0], Behavior::SwapChains)]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].error, SyncError::ChainStalled { chain_idx: 0, .. }));
    assert_eq!(report.blocks_imported(), 0);
    assert_eq!(store.chain(0), network.chains[0][..1].to_vec());
}

#[tokio::test]
async fn test_block_for_other_chain_id_rejected() {
    let mut network = Network::build(2, 3);
    network.resign_block(1, 2, 999);
    let store = Arc::new(network.local_store(&[3, 1]));
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].error,
        SyncError::Authentication {
            chain_idx: 1,
            block_number: 2,
            source: BlockchainError::InvalidSignature(_)
        }
    ));
    assert_eq!(store.chain(1).len(), 1);
}

#[tokio::test]
async fn test_endless_peer_is_cut_off() {
    let network = Network::build(3, 2);
    let store = network.local_store(&[2, 1, 2]);
    let peers = peers(1);
    let transport = ScriptedTransport::new(&network, &[(peers[0], Behavior::Endless)]);
    let registry = registry_with(&peers).await;
    let config = SyncConfig {
        max_window_leaves: 16,
        ..config()
    };

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let outcome = reconciler.reconcile_window(&params).await.unwrap();

    assert!(outcome.is_escalated());
    // Only the chains known locally, not the leaves the peer invented
    assert_eq!(outcome.into_parameters().chain_idx_that_we_need(), &[0, 1, 2]);
    assert_eq!(transport.fragment_requests(), 4);
    assert_eq!(registry.health(&peers[0]).await.unwrap().failed_requests(), 1);
}

#[tokio::test]
async fn test_malformed_leaves_count_against_peer() {
    let network = Network::build(5, 3);
    let store = network.local_store(&[3, 3, 2, 3, 3]);
    let peers = peers(2);
    let transport = ScriptedTransport::new(&network, &[(peers[0], Behavior::MalformedLeaves)]);
    let registry = registry_with(&peers).await;
    let config = config();

    let reconciler = FragmentReconciler::new(&store, &transport, &registry, &config);
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let outcome = reconciler.reconcile_window(&params).await.unwrap();

    assert_eq!(outcome.into_parameters().chain_idx_that_we_need(), &[2]);
    assert_eq!(transport.fragment_requests(), 4);
    assert_eq!(registry.health(&peers[0]).await.unwrap().failed_requests(), 2);
}

#[tokio::test]
async fn test_escalated_window_fetches_every_stale_chain() {
    let network = Network::build(3, 3);
    let store = Arc::new(network.local_store(&[1, 0, 3]));
    let peers = peers(1);
    let transport = Arc::new(ScriptedTransport::new(&network, &[(peers[0], Behavior::Divergent)]));
    let registry = Arc::new(registry_with(&peers).await);

    let syncer = Syncer::new(store.clone(), transport, registry, config());
    let params = session(&store, network.root(), &peers, SyncStage::FastSync);
    let report = syncer.sync(&params).await.unwrap();

    assert!(report.escalated);
    assert!(report.is_complete(), "failures: {:?}", report.failures);
    // Chain 2 is already at the peer's head
    assert_eq!(report.chains_requested, vec![0, 1]);
    assert_eq!(report.blocks_imported(), 2 + 3);
    assert_eq!(store.leaves(), network.leaves());
}
