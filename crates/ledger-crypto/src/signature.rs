// ledger-crypto/src/signature.rs

use crate::{CryptoError, CryptoResult, Hash, PublicKey, SecretKey};
use secp256k1::ecdsa::{RecoverableSignature as SecpRecoverable, RecoveryId};
use secp256k1::{Message, Secp256k1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recoverable secp256k1 ECDSA signature split into its `(recovery_id, r, s)`
/// components. `recovery_id` is the canonical 0/1 value, not a `v` offset.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverableSignature {
    recovery_id: u8,
    r: [u8; 32],
    s: [u8; 32],
}

impl RecoverableSignature {
    pub fn from_parts(recovery_id: u8, r: [u8; 32], s: [u8; 32]) -> Self {
        Self { recovery_id, r, s }
    }

    /// Sign a 32-byte digest
    pub fn sign(digest: &Hash, secret_key: &SecretKey) -> CryptoResult<Self> {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest_slice(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidHash)?;

        let signature = secp.sign_ecdsa_recoverable(&msg, &secret_key.to_secp()?);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);

        Ok(Self {
            recovery_id: recovery_id.to_i32() as u8,
            r,
            s,
        })
    }

    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    pub fn r(&self) -> [u8; 32] {
        self.r
    }

    pub fn s(&self) -> [u8; 32] {
        self.s
    }

    fn to_secp(&self) -> CryptoResult<SecpRecoverable> {
        let recovery_id = RecoveryId::from_i32(self.recovery_id as i32)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        SecpRecoverable::from_compact(&compact, recovery_id)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Recover the public key that produced this signature over `digest`
    pub fn recover(&self, digest: &Hash) -> CryptoResult<PublicKey> {
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidHash)?;
        let public_key = secp
            .recover_ecdsa(&msg, &self.to_secp()?)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
        Ok(PublicKey::from_secp(&public_key))
    }

    /// Verify this signature against `digest` and `public_key`.
    /// High-s signatures are rejected.
    pub fn verify(&self, digest: &Hash, public_key: &PublicKey) -> CryptoResult<bool> {
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidHash)?;
        let signature = self.to_secp()?.to_standard();
        Ok(secp.verify_ecdsa(&msg, &signature, &public_key.to_secp()?).is_ok())
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecoverableSignature(v={}, r={}..., s={}...)",
            self.recovery_id,
            hex::encode(&self.r[..4]),
            hex::encode(&self.s[..4])
        )
    }
}
