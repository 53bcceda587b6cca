// ledger-crypto/src/keypair.rs

use crate::{hash::Hashable, CryptoError, CryptoResult, Hash, RecoverableSignature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uncompressed secp256k1 public key (65 bytes, `0x04` prefix)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let key = secp256k1::PublicKey::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self::from_secp(&key))
    }

    pub(crate) fn from_secp(key: &secp256k1::PublicKey) -> Self {
        Self { bytes: key.serialize_uncompressed().to_vec() }
    }

    pub(crate) fn to_secp(&self) -> CryptoResult<secp256k1::PublicKey> {
        secp256k1::PublicKey::from_slice(&self.bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::DeserializationError(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Verify a signature over a 32-byte digest
    pub fn verify(&self, digest: &Hash, signature: &RecoverableSignature) -> CryptoResult<bool> {
        signature.verify(digest, self)
    }

    /// Canonical account address of this key
    pub fn to_address(&self) -> Address {
        Address::from_public_key(self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.bytes[..8.min(self.bytes.len())]))
    }
}

/// Secret/Private key wrapper (kept private)
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let key = secp256k1::SecretKey::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { bytes: key.secret_bytes() })
    }

    pub(crate) fn to_secp(&self) -> CryptoResult<secp256k1::SecretKey> {
        secp256k1::SecretKey::from_slice(&self.bytes)
            .map_err(|_| CryptoError::InvalidSecretKey)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::DeserializationError(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        // Zero out the key material on drop
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// secp256k1 key pair used to sign block headers
pub struct KeyPair {
    public_key: PublicKey,
    secret_key: SecretKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        use secp256k1::Secp256k1;

        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);

        Self {
            public_key: PublicKey::from_secp(&public_key),
            secret_key: SecretKey { bytes: secret_key.secret_bytes() },
        }
    }

    /// Rebuild the keypair belonging to an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> CryptoResult<Self> {
        let secp = secp256k1::Secp256k1::signing_only();
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key.to_secp()?);
        Ok(Self {
            public_key: PublicKey::from_secp(&public_key),
            secret_key,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn address(&self) -> Address {
        self.public_key.to_address()
    }

    /// Sign a 32-byte digest, keeping the recovery id
    pub fn sign_digest(&self, digest: &Hash) -> CryptoResult<RecoverableSignature> {
        RecoverableSignature::sign(digest, &self.secret_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Account address: last 20 bytes of the Keccak-256 of the uncompressed
/// public key without its `0x04` prefix
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct Address([u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let bytes = public_key.as_bytes();
        let hash = bytes[1..].hash();
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash.as_bytes()[12..32]);
        Self(address)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::DeserializationError(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(CryptoError::DeserializationError("Invalid address length".into()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn zero() -> Self {
        Self([0u8; 20])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
