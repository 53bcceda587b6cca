// chain-sync/src/snapshot.rs

//! Point-in-time report of connected peers and their health.

use crate::peer::{PeerRecord, PeerRegistry};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedNode {
    pub url: String,
    pub ip_address: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub stake: u128,
    pub requests_sent: u64,
    pub failed_requests: u64,
    /// Seconds
    pub average_response_time: f64,
}

impl From<&PeerRecord> for ConnectedNode {
    fn from(record: &PeerRecord) -> Self {
        Self {
            url: record.url(),
            ip_address: record.address.ip,
            udp_port: record.address.udp_port,
            tcp_port: record.address.tcp_port,
            stake: record.stake,
            requests_sent: record.health.requests_sent(),
            failed_requests: record.health.failed_requests(),
            average_response_time: record.health.average_response_time(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedNodesInfo {
    pub connected_nodes: Vec<ConnectedNode>,
}

impl ConnectedNodesInfo {
    pub fn new(connected_nodes: Vec<ConnectedNode>) -> Self {
        Self { connected_nodes }
    }

    /// Snapshot of the registry, most preferred peer first
    pub async fn generate(registry: &PeerRegistry) -> Self {
        let records = registry.ranked_records().await;
        Self::new(records.iter().map(ConnectedNode::from).collect())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn len(&self) -> usize {
        self.connected_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected_nodes.is_empty()
    }
}
