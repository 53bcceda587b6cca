// Shared fixtures: an in-memory chain store and a scripted peer network.

#![allow(dead_code)]

use async_trait::async_trait;
use chain_sync::{
    window_root, ChainStore, HashFragmentBundle, NodeAddress, PeerError, PeerId, PeerRegistry,
    PeerTransport, StorageError, StorageResult, WindowLeaf,
};
use ledger_core::{
    Amount, Block, BlockHeader, BlockNumber, ChainId, ChainIndex, Gwei, Timestamp, Transaction,
};
use ledger_crypto::{Address, Hash, KeyPair};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const CHAIN_ID: u64 = 1;
pub const TWO_GWEI: u64 = 2_000_000_000;

/// Chain heads as window leaves; an empty chain has a zero leaf
pub fn leaves_of(chains: &[Vec<Block>]) -> Vec<WindowLeaf> {
    chains
        .iter()
        .map(|chain| match chain.last() {
            Some(head) => WindowLeaf::new(head.timestamp(), head.hash()),
            None => WindowLeaf::new(0, Hash::zero()),
        })
        .collect()
}

pub fn signed_block(
    keypair: &KeyPair,
    chain_idx: ChainIndex,
    number: BlockNumber,
    parent_hash: Hash,
    gas_price: u64,
) -> Block {
    let header = BlockHeader::new(
        keypair.address(),
        parent_hash,
        number,
        1_000 + number * 10 + chain_idx as u64,
    );
    let tx = Transaction::new(number, gas_price, 21_000, Address::zero(), Amount::from_u64(1));
    let mut block = Block::new(header, vec![tx], Vec::new());
    block.header.sign(keypair, CHAIN_ID).unwrap();
    block
}

/// The consensus view every honest peer serves
pub struct Network {
    pub owners: Vec<KeyPair>,
    pub chains: Vec<Vec<Block>>,
}

impl Network {
    pub fn build(chain_count: usize, blocks_per_chain: u64) -> Self {
        let owners: Vec<KeyPair> = (0..chain_count).map(|_| KeyPair::generate()).collect();
        let chains = owners
            .iter()
            .enumerate()
            .map(|(chain_idx, keypair)| {
                let mut chain: Vec<Block> = Vec::new();
                for number in 0..blocks_per_chain {
                    let parent = chain.last().map(|b| b.hash()).unwrap_or_else(Hash::zero);
                    chain.push(signed_block(keypair, chain_idx, number, parent, TWO_GWEI));
                }
                chain
            })
            .collect();
        Self { owners, chains }
    }

    pub fn leaves(&self) -> Vec<WindowLeaf> {
        leaves_of(&self.chains)
    }

    pub fn root(&self) -> Hash {
        window_root(&self.leaves())
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.owners.iter().map(|k| k.address()).collect()
    }

    /// Local store holding the first `heights[i]` blocks of chain `i`
    pub fn local_store(&self, heights: &[usize]) -> MemoryStore {
        let chains = self
            .chains
            .iter()
            .zip(heights)
            .map(|(chain, &height)| chain[..height].to_vec())
            .collect();
        MemoryStore::new(self.addresses(), chains, 1)
    }

    pub fn synced_store(&self) -> MemoryStore {
        let heights: Vec<usize> = self.chains.iter().map(Vec::len).collect();
        self.local_store(&heights)
    }

    /// Replace block `number` of a chain with one signed by someone else
    pub fn forge_block(&mut self, chain_idx: ChainIndex, number: BlockNumber) {
        let intruder = KeyPair::generate();
        let original = &self.chains[chain_idx][number as usize];
        let mut header = original.header.clone();
        header.sign(&intruder, CHAIN_ID).unwrap();
        self.chains[chain_idx][number as usize] = Block {
            header,
            transactions: original.transactions.clone(),
            receive_transactions: Vec::new(),
        };
    }

    /// Replace block `number` of a chain with a correctly signed but cheap one
    /// Re-sign block `number` of a chain by its owner for another chain id
    pub fn resign_block(&mut self, chain_idx: ChainIndex, number: BlockNumber, chain_id: ChainId) {
        let block = &mut self.chains[chain_idx][number as usize];
        block.header.sign(&self.owners[chain_idx], chain_id).unwrap();
    }

    pub fn underprice_block(&mut self, chain_idx: ChainIndex, number: BlockNumber) {
        let parent = self.chains[chain_idx][number as usize].header.parent_hash;
        let block = signed_block(&self.owners[chain_idx], chain_idx, number, parent, 1);
        self.chains[chain_idx][number as usize] = block;
    }
}

pub struct MemoryStore {
    owners: Vec<Address>,
    chains: Mutex<Vec<Vec<Block>>>,
    min_gas_price_gwei: Gwei,
}

impl MemoryStore {
    pub fn new(owners: Vec<Address>, chains: Vec<Vec<Block>>, min_gas_price_gwei: Gwei) -> Self {
        Self {
            owners,
            chains: Mutex::new(chains),
            min_gas_price_gwei,
        }
    }

    pub fn chain(&self, chain_idx: ChainIndex) -> Vec<Block> {
        self.chains.lock().unwrap()[chain_idx].clone()
    }

    pub fn leaves(&self) -> Vec<WindowLeaf> {
        leaves_of(&self.chains.lock().unwrap())
    }
}

impl ChainStore for MemoryStore {
    fn get_canonical_head_root_hash(&self) -> Hash {
        window_root(&self.leaves())
    }

    fn get_leaf_hashes(&self, _window_timestamp: Timestamp, range: Range<usize>) -> Vec<WindowLeaf> {
        let leaves = self.leaves();
        let end = range.end.min(leaves.len());
        let start = range.start.min(end);
        leaves[start..end].to_vec()
    }

    fn get_chain_head(&self, chain_idx: ChainIndex) -> Option<BlockHeader> {
        self.chains
            .lock()
            .unwrap()
            .get(chain_idx)
            .and_then(|chain| chain.last())
            .map(|block| block.header.clone())
    }

    fn persist_block(&self, block: &Block) -> StorageResult<()> {
        let chain_idx = self
            .owners
            .iter()
            .position(|owner| *owner == block.header.chain_address)
            .ok_or_else(|| StorageError::Database("unknown chain".into()))?;

        let mut chains = self.chains.lock().unwrap();
        let chain = &mut chains[chain_idx];
        let number = block.number() as usize;
        if number < chain.len() && chain[number] == *block {
            return Ok(());
        }
        if number != chain.len() {
            return Err(StorageError::NonContiguous {
                chain_idx,
                block_number: block.number(),
            });
        }
        chain.push(block.clone());
        Ok(())
    }

    fn get_required_min_gas_price(&self, _timestamp: Timestamp) -> Gwei {
        self.min_gas_price_gwei
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Honest,
    Disconnected,
    /// Fragment bundles whose digest does not match
    CorruptFragments,
    /// Serves a different window than the consensus one
    Divergent,
    /// Never answers
    Hang,
    /// Answers block and head requests for chain `i` with chain `i + 1`
    SwapChains,
    /// Full segments of fresh leaves at any offset
    Endless,
    /// Leaves one byte short under a matching digest
    MalformedLeaves,
}

pub struct ScriptedTransport {
    network: Vec<Vec<Block>>,
    divergent: Vec<WindowLeaf>,
    behaviors: HashMap<PeerId, Behavior>,
    fragment_requests: AtomicUsize,
    block_requests: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(network: &Network, behaviors: &[(PeerId, Behavior)]) -> Self {
        let mut divergent = network.leaves();
        if let Some(first) = divergent.first_mut() {
            first.hash = Hash::new([0xee; 32]);
        }
        Self {
            network: network.chains.clone(),
            divergent,
            behaviors: behaviors.iter().copied().collect(),
            fragment_requests: AtomicUsize::new(0),
            block_requests: AtomicUsize::new(0),
        }
    }

    pub fn fragment_requests(&self) -> usize {
        self.fragment_requests.load(Ordering::SeqCst)
    }

    pub fn block_requests(&self) -> usize {
        self.block_requests.load(Ordering::SeqCst)
    }

    fn served_chain(&self, behavior: Behavior, chain_idx: ChainIndex) -> ChainIndex {
        match behavior {
            Behavior::SwapChains => (chain_idx + 1) % self.network.len(),
            _ => chain_idx,
        }
    }

    async fn check(&self, peer: PeerId) -> Result<Behavior, PeerError> {
        match self.behaviors.get(&peer).copied().unwrap_or(Behavior::Honest) {
            Behavior::Disconnected => Err(PeerError::Disconnected),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(PeerError::Disconnected)
            }
            behavior => Ok(behavior),
        }
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn request_fragments(
        &self,
        peer: PeerId,
        _window_timestamp: Timestamp,
        offset: usize,
        length: usize,
    ) -> Result<HashFragmentBundle, PeerError> {
        self.fragment_requests.fetch_add(1, Ordering::SeqCst);
        let behavior = self.check(peer).await?;

        if behavior == Behavior::Endless {
            let leaves: Vec<WindowLeaf> = (offset..offset + length)
                .map(|i| WindowLeaf::new(i as u64, Hash::new([(i % 251) as u8 + 1; 32])))
                .collect();
            return Ok(HashFragmentBundle::from_leaves(&leaves));
        }

        let leaves = match behavior {
            Behavior::Divergent => self.divergent.clone(),
            _ => leaves_of(&self.network),
        };
        let end = offset.saturating_add(length).min(leaves.len());
        let start = offset.min(end);
        let mut bundle = HashFragmentBundle::from_leaves(&leaves[start..end]);

        match behavior {
            Behavior::CorruptFragments => {
                bundle.root_hash_of_the_full_hashes = Hash::new([0xaa; 32]);
            }
            Behavior::MalformedLeaves => {
                let fragments = bundle
                    .fragments
                    .into_iter()
                    .map(|mut fragment| {
                        fragment.pop();
                        fragment
                    })
                    .collect();
                bundle = HashFragmentBundle::new(fragments);
            }
            _ => {}
        }
        Ok(bundle)
    }

    async fn request_block_range(
        &self,
        peer: PeerId,
        chain_idx: ChainIndex,
        start_idx: BlockNumber,
        end_idx: BlockNumber,
    ) -> Result<Vec<Block>, PeerError> {
        self.block_requests.fetch_add(1, Ordering::SeqCst);
        let chain_idx = self.served_chain(self.check(peer).await?, chain_idx);

        let chain = self
            .network
            .get(chain_idx)
            .ok_or_else(|| PeerError::InvalidResponse("unknown chain".into()))?;
        let end = (end_idx as usize + 1).min(chain.len());
        let start = (start_idx as usize).min(end);
        Ok(chain[start..end].to_vec())
    }

    async fn request_chain_head_height(
        &self,
        peer: PeerId,
        chain_idx: ChainIndex,
        _head_root_hash: Hash,
    ) -> Result<BlockNumber, PeerError> {
        let chain_idx = self.served_chain(self.check(peer).await?, chain_idx);
        self.network
            .get(chain_idx)
            .and_then(|chain| chain.last())
            .map(|block| block.number())
            .ok_or_else(|| PeerError::InvalidResponse("empty chain".into()))
    }
}

pub async fn registry_with(peers: &[PeerId]) -> PeerRegistry {
    let registry = PeerRegistry::new();
    for (i, peer) in peers.iter().enumerate() {
        let port = 30_000 + i as u16;
        let address = NodeAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port, port);
        registry.register(*peer, address, 1_000).await;
    }
    registry
}
