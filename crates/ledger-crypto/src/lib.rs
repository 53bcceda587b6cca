// ledger-crypto/src/lib.rs

//! Cryptographic primitives for the multi-chain ledger
//!
//! This crate provides:
//! - Keccak-256 / SHA-256 hashing into a 32-byte `Hash`
//! - secp256k1 key pairs and account addresses
//! - Recoverable ECDSA signatures (public key recovery from a signature)
//! - The Merkle root used to commit to a chronological window

pub mod hash;
pub mod signature;
pub mod keypair;
pub mod merkle;

pub use hash::{Hash, HashAlgorithm, Hashable, HASH_SIZE};
pub use signature::RecoverableSignature;
pub use keypair::{KeyPair, PublicKey, SecretKey, Address};
pub use merkle::MerkleTree;

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Invalid hash")]
    InvalidHash,

    #[error("Public key recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Merkle tree error: {0}")]
    MerkleError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_basics() {
        let keypair = KeyPair::generate();
        let digest = b"Hello, ledger!".hash();
        let signature = keypair.sign_digest(&digest).unwrap();
        let recovered = signature.recover(&digest).unwrap();
        assert_eq!(&recovered, keypair.public_key());
    }
}
