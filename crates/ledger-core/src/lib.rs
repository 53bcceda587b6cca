// ledger-core/src/lib.rs

//! Core ledger data structures and block-level rules
//!
//! This crate provides:
//! - Block and transaction types of an account chain
//! - EIP-155 style block header authentication and the gas price gate
//! - Chronological ordering repair for blocks merged across chains

pub mod auth;
pub mod block;
pub mod chronological;
pub mod transaction;
pub mod types;

pub use auth::{
    average_gas_price, create_block_header_signature, extract_block_header_sender,
    meets_minimum_gas_price, validate_block_header_chain_id, validate_block_header_signature,
    AverageGasPrice,
};
pub use block::{Block, BlockHeader};
pub use chronological::{insert_chronologically, repair_at, Chronological};
pub use transaction::{ReceiveTransaction, Transaction};
pub use types::*;

/// Result type for ledger operations
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// Errors that can occur in ledger operations
#[derive(Debug, thiserror::Error)]
pub enum BlockchainError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] ledger_crypto::CryptoError),
}
