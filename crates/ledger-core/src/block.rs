// ledger-core/src/block.rs
use crate::{
    auth,
    transaction::{ReceiveTransaction, Transaction},
    types::*,
    BlockchainError, BlockchainResult,
};
use ledger_crypto::{hash::Hashable, merkle::empty_root, Address, Hash, KeyPair, MerkleTree};
use serde::{Deserialize, Serialize};

/// Header of one block in an account chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Owner of the chain this block extends
    pub chain_address: Address,
    pub parent_hash: Hash,
    pub block_number: BlockNumber,
    pub timestamp: Timestamp,
    pub transaction_root: Hash,
    pub receive_tx_root: Hash,
    pub gas_limit: Gas,
    pub gas_used: Gas,
    pub extra_data: Vec<u8>,
    /// EIP-155 encoded recovery id (`recovery_id + chain_id * 2 + 35`)
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// The header fields covered by the signature, in signing order, followed by
/// the EIP-155 `(chain_id, 0, 0)` triple
#[derive(Serialize)]
struct SigningPayload<'a> {
    chain_address: &'a Address,
    parent_hash: &'a Hash,
    block_number: BlockNumber,
    timestamp: Timestamp,
    transaction_root: &'a Hash,
    receive_tx_root: &'a Hash,
    gas_limit: Gas,
    gas_used: Gas,
    extra_data: &'a [u8],
    chain_id: ChainId,
    empty_r: &'a [u8],
    empty_s: &'a [u8],
}

impl BlockHeader {
    /// Unsigned header
    pub fn new(
        chain_address: Address,
        parent_hash: Hash,
        block_number: BlockNumber,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            chain_address,
            parent_hash,
            block_number,
            timestamp,
            transaction_root: empty_root(),
            receive_tx_root: empty_root(),
            gas_limit: 31_415_926,
            gas_used: 0,
            extra_data: Vec::new(),
            v: 0,
            r: [0u8; 32],
            s: [0u8; 32],
        }
    }

    /// Header hash, signature included
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).expect("header encoding is infallible");
        bytes.hash()
    }

    /// Digest that gets signed. With `chain_id = None` the chain id encoded in
    /// `v` is used, which is what verification does.
    pub fn message_for_signing(&self, chain_id: Option<ChainId>) -> Hash {
        let chain_id = chain_id.unwrap_or_else(|| auth::extract_chain_id(self.v));
        let payload = SigningPayload {
            chain_address: &self.chain_address,
            parent_hash: &self.parent_hash,
            block_number: self.block_number,
            timestamp: self.timestamp,
            transaction_root: &self.transaction_root,
            receive_tx_root: &self.receive_tx_root,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            extra_data: &self.extra_data,
            chain_id,
            empty_r: &[],
            empty_s: &[],
        };
        let bytes = bincode::serialize(&payload).expect("signing payload encoding is infallible");
        bytes.hash()
    }

    /// Sign in place, installing `(v, r, s)`
    pub fn sign(&mut self, keypair: &KeyPair, chain_id: ChainId) -> BlockchainResult<()> {
        let (v, r, s) = auth::create_block_header_signature(self, keypair, chain_id)?;
        self.v = v;
        self.r = r;
        self.s = s;
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.v != 0
    }
}

/// Complete block structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub receive_transactions: Vec<ReceiveTransaction>,
}

impl Block {
    /// Assemble an unsigned block, deriving roots and gas used from its contents
    pub fn new(
        mut header: BlockHeader,
        transactions: Vec<Transaction>,
        receive_transactions: Vec<ReceiveTransaction>,
    ) -> Self {
        let tx_hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
        let receive_hashes: Vec<Hash> = receive_transactions.iter().map(|tx| tx.hash()).collect();

        header.transaction_root = MerkleTree::root_of(&tx_hashes);
        header.receive_tx_root = MerkleTree::root_of(&receive_hashes);
        header.gas_used = transactions.iter().map(|tx| tx.gas).sum();

        Self {
            header,
            transactions,
            receive_transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.block_number
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Check that header roots commit to the block contents
    pub fn validate_contents(&self) -> BlockchainResult<()> {
        let tx_hashes: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        if MerkleTree::root_of(&tx_hashes) != self.header.transaction_root {
            return Err(BlockchainError::InvalidBlock(
                "Transaction root mismatch".into()
            ));
        }

        let receive_hashes: Vec<Hash> = self.receive_transactions.iter().map(|tx| tx.hash()).collect();
        if MerkleTree::root_of(&receive_hashes) != self.header.receive_tx_root {
            return Err(BlockchainError::InvalidBlock(
                "Receive transaction root mismatch".into()
            ));
        }

        if self.header.gas_used > self.header.gas_limit {
            return Err(BlockchainError::InvalidBlock(
                "Gas used exceeds gas limit".into()
            ));
        }

        Ok(())
    }
}
