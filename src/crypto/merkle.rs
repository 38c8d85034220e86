//! Merkle root over transaction ids

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Returns the root and whether any level contained two identical adjacent
/// nodes. Duplicating the last node on odd levels makes such a tree
/// indistinguishable from one with a repeated transaction, so callers
/// validating blocks must reject a mutated root.
pub fn compute_merkle_root(hashes: &[Hash]) -> (Hash, bool) {
    if hashes.is_empty() {
        return (Hash::zero(), false);
    }

    let mut mutated = false;
    let mut level: Vec<Hash> = hashes.to_vec();

    while level.len() > 1 {
        for pair in level.chunks(2) {
            if pair.len() == 2 && pair[0] == pair[1] {
                mutated = true;
            }
        }

        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    (level[0], mutated)
}
