// ledger-core/src/types.rs

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Block height within one account chain
pub type BlockNumber = u64;

/// Position of an account chain inside a chronological window
pub type ChainIndex = usize;

/// Transaction nonce
pub type Nonce = u64;

/// Gas price in wei
pub type GasPrice = u64;

/// Gas price in gwei
pub type Gwei = u64;

/// Gas limit/used
pub type Gas = u64;

/// EIP-155 chain identifier
pub type ChainId = u64;

/// Timestamp in Unix epoch seconds
pub type Timestamp = u64;

/// Seconds between two saved global head-hash roots (one chronological window)
pub const TIME_BETWEEN_HEAD_HASH_SAVE: Timestamp = 1000;

pub const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Token amount (using BigUint for arbitrary precision)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(BigUint);

impl Amount {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(&self.0 + &other.0)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Start of the chronological window whose contents hash into the root saved
/// at `timestamp_for_root_hash`.
///
/// Roots saved within the first `TIME_BETWEEN_HEAD_HASH_SAVE` seconds of the
/// epoch have no earlier window; they clamp to window 0 instead of underflowing.
pub fn chronological_window_for_root(timestamp_for_root_hash: Timestamp) -> Timestamp {
    timestamp_for_root_hash.saturating_sub(TIME_BETWEEN_HEAD_HASH_SAVE)
}
