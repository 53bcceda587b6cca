// ledger-core/src/auth.rs

//! Block header authentication.
//!
//! Headers carry an EIP-155 style `(v, r, s)` signature: `v` encodes both the
//! recovery id and the chain id, so a header signed for one chain id never
//! validates under another. The signer is not stored in the header; it is
//! recovered from the signature and must be the owner of the chain
//! (`chain_address`).

use crate::{block::{Block, BlockHeader}, types::*, BlockchainError, BlockchainResult};
use ledger_crypto::{Address, KeyPair, PublicKey, RecoverableSignature};
use serde::{Deserialize, Serialize};

pub const EIP155_CHAIN_ID_OFFSET: u64 = 35;
pub const V_OFFSET: u64 = 27;

pub fn is_eip155_signed(header: &BlockHeader) -> bool {
    header.v >= EIP155_CHAIN_ID_OFFSET
}

pub fn extract_chain_id(v: u64) -> ChainId {
    if v % 2 == 0 {
        v.saturating_sub(EIP155_CHAIN_ID_OFFSET + 1) / 2
    } else {
        v.saturating_sub(EIP155_CHAIN_ID_OFFSET) / 2
    }
}

/// Pre-EIP-155 `v` (27 or 28) for an encoded `v`
pub fn extract_signature_v(v: u64) -> u64 {
    if v % 2 == 0 {
        V_OFFSET + 1
    } else {
        V_OFFSET
    }
}

/// Sign `header` for `chain_id`, returning `(v, r, s)`
pub fn create_block_header_signature(
    header: &BlockHeader,
    keypair: &KeyPair,
    chain_id: ChainId,
) -> BlockchainResult<(u64, [u8; 32], [u8; 32])> {
    let message = header.message_for_signing(Some(chain_id));
    let signature = keypair.sign_digest(&message)?;

    let v = signature.recovery_id() as u64 + chain_id * 2 + EIP155_CHAIN_ID_OFFSET;
    Ok((v, signature.r(), signature.s()))
}

fn recover_public_key(header: &BlockHeader) -> BlockchainResult<(RecoverableSignature, PublicKey)> {
    if !is_eip155_signed(header) {
        return Err(BlockchainError::InvalidSignature(format!(
            "v = {} is not an EIP-155 signature", header.v
        )));
    }

    let recovery_id = (extract_signature_v(header.v) - V_OFFSET) as u8;
    let signature = RecoverableSignature::from_parts(recovery_id, header.r, header.s);
    let message = header.message_for_signing(None);

    let public_key = signature.recover(&message)
        .map_err(|e| BlockchainError::InvalidSignature(format!("Bad Signature: {}", e)))?;
    Ok((signature, public_key))
}

/// Reject the header unless its signature recovers to a key that verifies the
/// signing message and owns the header's chain
pub fn validate_block_header_signature(header: &BlockHeader) -> BlockchainResult<()> {
    let (signature, public_key) = recover_public_key(header)?;
    let message = header.message_for_signing(None);

    let verified = signature.verify(&message, &public_key)
        .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    if !verified {
        return Err(BlockchainError::InvalidSignature("Invalid Signature".into()));
    }

    let signer = public_key.to_address();
    if signer != header.chain_address {
        return Err(BlockchainError::InvalidSignature(format!(
            "signer {} does not own chain {}", signer, header.chain_address
        )));
    }

    Ok(())
}

/// Reject a header whose `v` encodes a chain id other than `chain_id`
pub fn validate_block_header_chain_id(header: &BlockHeader, chain_id: ChainId) -> BlockchainResult<()> {
    let signed_for = extract_chain_id(header.v);
    if signed_for != chain_id {
        return Err(BlockchainError::InvalidSignature(format!(
            "header signed for chain id {}, expected {}", signed_for, chain_id
        )));
    }
    Ok(())
}

/// Address of whoever signed `header`
pub fn extract_block_header_sender(header: &BlockHeader) -> BlockchainResult<Address> {
    let (_, public_key) = recover_public_key(header)?;
    Ok(public_key.to_address())
}

/// Mean gas price of a block's send transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AverageGasPrice {
    /// No send transactions (pure receive or reward block)
    Infinite,
    /// Integer mean in wei, truncated
    Wei(u128),
}

impl AverageGasPrice {
    pub fn is_infinite(&self) -> bool {
        matches!(self, AverageGasPrice::Infinite)
    }
}

pub fn average_gas_price(block: &Block) -> AverageGasPrice {
    if block.transactions.is_empty() {
        return AverageGasPrice::Infinite;
    }

    let total: u128 = block.transactions.iter().map(|tx| tx.gas_price as u128).sum();
    AverageGasPrice::Wei(total / block.transactions.len() as u128)
}

pub fn meets_minimum_gas_price(block: &Block, required_min_gwei: Gwei) -> bool {
    match average_gas_price(block) {
        AverageGasPrice::Infinite => true,
        AverageGasPrice::Wei(average) => average >= required_min_gwei as u128 * WEI_PER_GWEI,
    }
}
