// ledger-core/src/transaction.rs

use crate::types::*;
use ledger_crypto::{hash::Hashable, Address, Hash};
use serde::{Deserialize, Serialize};

/// Send transaction carried by a block of the sender's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: Nonce,
    /// Gas price in wei
    pub gas_price: GasPrice,
    pub gas: Gas,
    pub to: Address,
    pub value: Amount,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(nonce: Nonce, gas_price: GasPrice, gas: Gas, to: Address, value: Amount) -> Self {
        Self {
            nonce,
            gas_price,
            gas,
            to,
            value,
            data: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).expect("transaction encoding is infallible");
        bytes.hash()
    }
}

/// Receipt of a send transaction, recorded on the recipient's chain. Carries
/// no gas price of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTransaction {
    pub sender_block_hash: Hash,
    pub send_transaction_hash: Hash,
    pub value: Amount,
}

impl ReceiveTransaction {
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).expect("receive transaction encoding is infallible");
        bytes.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_hash_changes_with_gas_price() {
        let a = Transaction::new(0, 10, 21_000, Address::zero(), Amount::from_u64(1));
        let mut b = a.clone();
        b.gas_price = 11;
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }
}
