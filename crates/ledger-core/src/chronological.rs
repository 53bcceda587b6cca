// ledger-core/src/chronological.rs

//! Ordering repair for the global chronological block sequence.
//!
//! Blocks of independent account chains arrive in network order, and several
//! blocks may share one timestamp. The sequence is kept ordered by timestamp
//! with local moves instead of a full re-sort.

use crate::{block::{Block, BlockHeader}, types::Timestamp};

/// Anything placed in the chronological sequence
pub trait Chronological {
    fn timestamp(&self) -> Timestamp;
}

impl Chronological for Block {
    fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }
}

impl Chronological for BlockHeader {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Move the element at `index` behind every following element that shares its
/// timestamp. Scanning stops at the first strictly greater timestamp. The
/// order of the other elements is unchanged.
///
/// Returns the element's new position.
pub fn repair_at<T: Chronological>(sequence: &mut [T], index: usize) -> usize {
    if index + 1 >= sequence.len() {
        return index;
    }

    let timestamp = sequence[index].timestamp();
    let mut last_peer = index;
    for (i, item) in sequence.iter().enumerate().skip(index + 1) {
        if item.timestamp() > timestamp {
            break;
        }
        last_peer = i;
    }

    if last_peer == index {
        return index;
    }

    tracing::debug!(from = index, to = last_peer, "Found that the blocks were out of order");
    sequence[index..=last_peer].rotate_left(1);
    last_peer
}

/// Insert `item` into an ordered sequence: at the first position whose
/// timestamp is not smaller, then repaired past its timestamp peers.
pub fn insert_chronologically<T: Chronological>(sequence: &mut Vec<T>, item: T) -> usize {
    let timestamp = item.timestamp();
    let index = sequence.partition_point(|existing| existing.timestamp() < timestamp);
    sequence.insert(index, item);
    repair_at(sequence, index)
}
