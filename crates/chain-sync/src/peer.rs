// chain-sync/src/peer.rs

use crate::{oracle::PeerError, SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Create new peer ID from bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate random peer ID
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 32] = rng.gen();
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Where a peer can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl NodeAddress {
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Self { ip, udp_port, tcp_port }
    }

    /// Display identifier of `peer` at this address
    pub fn url(&self, peer: &PeerId) -> String {
        format!("node://{}@{}:{}", peer.to_hex(), self.ip, self.tcp_port)
    }
}

/// Request counters of one peer, updated concurrently by in-flight requests
#[derive(Debug, Default)]
pub struct PeerHealth {
    requests_sent: AtomicU64,
    failed_requests: AtomicU64,
    responses: AtomicU64,
    total_response_micros: AtomicU64,
}

impl PeerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.total_response_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Mean response time of successful requests, in seconds
    pub fn average_response_time(&self) -> f64 {
        let responses = self.responses.load(Ordering::Relaxed);
        if responses == 0 {
            return 0.0;
        }
        let total = self.total_response_micros.load(Ordering::Relaxed);
        total as f64 / responses as f64 / 1_000_000.0
    }

    pub fn failure_rate(&self) -> f64 {
        let sent = self.requests_sent();
        if sent == 0 {
            return 0.0;
        }
        // A failure can be counted before its request on another thread
        (self.failed_requests() as f64 / sent as f64).min(1.0)
    }
}

/// A registered peer
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub address: NodeAddress,
    /// Stake in wei
    pub stake: u128,
    pub health: Arc<PeerHealth>,
}

impl PeerRecord {
    pub fn url(&self) -> String {
        self.address.url(&self.id)
    }

    /// Ranking inputs read once, so counters moving under a sort cannot
    /// change how this record compares
    fn rank_key(&self) -> RankKey {
        RankKey {
            failure_rate: self.health.failure_rate(),
            average_response_time: self.health.average_response_time(),
            stake: self.stake,
            id: self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RankKey {
    failure_rate: f64,
    average_response_time: f64,
    stake: u128,
    id: PeerId,
}

impl RankKey {
    fn preference(&self, other: &Self) -> CmpOrdering {
        self.failure_rate
            .total_cmp(&other.failure_rate)
            .then_with(|| self.average_response_time.total_cmp(&other.average_response_time))
            .then_with(|| other.stake.cmp(&self.stake))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Peers known to this node
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, keeping its health if it is already known
    pub async fn register(&self, id: PeerId, address: NodeAddress, stake: u128) -> Arc<PeerHealth> {
        let mut peers = self.peers.write().await;
        let record = peers.entry(id).or_insert_with(|| PeerRecord {
            id,
            address,
            stake,
            health: Arc::new(PeerHealth::new()),
        });
        record.address = address;
        record.stake = stake;
        tracing::debug!(peer = %id, url = %record.url(), "Registered peer");
        record.health.clone()
    }

    pub async fn remove(&self, id: &PeerId) -> Option<PeerRecord> {
        self.peers.write().await.remove(id)
    }

    /// Returns false if the peer is unknown
    pub async fn set_stake(&self, id: &PeerId, stake: u128) -> bool {
        match self.peers.write().await.get_mut(id) {
            Some(record) => {
                record.stake = stake;
                true
            }
            None => false,
        }
    }

    pub async fn health(&self, id: &PeerId) -> Option<Arc<PeerHealth>> {
        self.peers.read().await.get(id).map(|record| record.health.clone())
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Copy of every record, most preferred first
    pub async fn ranked_records(&self) -> Vec<PeerRecord> {
        let mut ranked: Vec<(RankKey, PeerRecord)> = self
            .peers
            .read()
            .await
            .values()
            .map(|record| (record.rank_key(), record.clone()))
            .collect();
        ranked.sort_by(|(a, _), (b, _)| a.preference(b));
        ranked.into_iter().map(|(_, record)| record).collect()
    }

    /// Peer ids in preference order: fewest failures, fastest, largest stake
    pub async fn ranked_peers(&self) -> Vec<PeerId> {
        self.ranked_records().await.into_iter().map(|record| record.id).collect()
    }

    pub async fn record_failure(&self, id: &PeerId) {
        if let Some(health) = self.health(id).await {
            health.record_failure();
        }
    }
}

/// Run one request against `peer` under `timeout`, recording the outcome in the
/// peer's health
pub(crate) async fn tracked_request<T, F>(
    registry: &PeerRegistry,
    peer: PeerId,
    timeout: Duration,
    request: F,
) -> SyncResult<T>
where
    F: Future<Output = Result<T, PeerError>>,
{
    let health = registry.health(&peer).await;
    if let Some(health) = &health {
        health.record_request();
    }

    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, request).await;

    match outcome {
        Ok(Ok(value)) => {
            if let Some(health) = &health {
                health.record_success(started.elapsed());
            }
            Ok(value)
        }
        Ok(Err(source)) => {
            if let Some(health) = &health {
                health.record_failure();
            }
            Err(SyncError::PeerRequest { peer, source })
        }
        Err(_) => {
            if let Some(health) = &health {
                health.record_failure();
            }
            Err(SyncError::PeerUnresponsive(peer))
        }
    }
}
