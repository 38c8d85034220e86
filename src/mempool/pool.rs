//! Pool of unconfirmed transactions
//!
//! Entries are indexed by transaction hash, by the outpoints their real
//! inputs spend, and by in-pool parent/child links. `TxMempool` itself is
//! not synchronized; the validator wraps it in the single-writer lock.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::mempool::{MempoolEntry, PersistedTx};
use crate::validation::{OutPoint, Transaction};

#[derive(Debug, Default)]
pub struct TxMempool {
    entries: HashMap<Hash, MempoolEntry>,
    /// Outpoint -> pooled transaction spending it (real inputs only)
    spent_by: HashMap<OutPoint, Hash>,
    parents: HashMap<Hash, HashSet<Hash>>,
    children: HashMap<Hash, HashSet<Hash>>,
    total_size: usize,
}

impl TxMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.spent_by.get(outpoint).copied()
    }

    /// Pooled transactions spending any of the real inputs of `tx`
    pub fn conflicts_of(&self, tx: &Transaction) -> Vec<(OutPoint, Hash)> {
        let own = tx.hash();
        tx.prevouts()
            .filter_map(|prevout| {
                self.spent_by
                    .get(prevout)
                    .filter(|spender| **spender != own)
                    .map(|spender| (*prevout, *spender))
            })
            .collect()
    }

    /// All in-pool ancestors of a (possibly not yet pooled) transaction
    pub fn calculate_ancestors(&self, tx: &Transaction) -> HashSet<Hash> {
        let mut ancestors = HashSet::new();
        let mut pending: Vec<Hash> = tx
            .prevouts()
            .map(|prevout| prevout.hash)
            .filter(|hash| self.entries.contains_key(hash))
            .collect();

        while let Some(hash) = pending.pop() {
            if !ancestors.insert(hash) {
                continue;
            }
            if let Some(parents) = self.parents.get(&hash) {
                pending.extend(parents.iter().copied());
            }
        }
        ancestors
    }

    /// All in-pool descendants of a pooled transaction, excluding itself
    pub fn calculate_descendants(&self, hash: &Hash) -> HashSet<Hash> {
        let mut descendants = HashSet::new();
        let mut pending: Vec<Hash> = self
            .children
            .get(hash)
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default();

        while let Some(next) = pending.pop() {
            if !descendants.insert(next) {
                continue;
            }
            if let Some(children) = self.children.get(&next) {
                pending.extend(children.iter().copied());
            }
        }
        descendants
    }

    /// Insert an entry whose checks have already passed
    pub fn add_unchecked(&mut self, mut entry: MempoolEntry, ancestors: &HashSet<Hash>) {
        let hash = entry.tx_hash;

        for ancestor in ancestors {
            if let Some(parent) = self.entries.get_mut(ancestor) {
                parent.descendant_count += 1;
                parent.descendant_size += entry.size;
                parent.descendant_fees += entry.fee;
                entry.ancestor_count += 1;
                entry.ancestor_size += parent.size;
                entry.ancestor_fees += parent.fee;
            }
        }

        let direct_parents: HashSet<Hash> = entry
            .tx
            .prevouts()
            .map(|prevout| prevout.hash)
            .filter(|parent| self.entries.contains_key(parent))
            .collect();
        for parent in &direct_parents {
            self.children.entry(*parent).or_default().insert(hash);
        }
        self.parents.insert(hash, direct_parents);
        self.children.entry(hash).or_default();

        for prevout in entry.tx.prevouts() {
            self.spent_by.insert(*prevout, hash);
        }

        self.total_size += entry.size;
        self.entries.insert(hash, entry);
    }

    /// Remove a transaction and everything that spends it
    pub fn remove_recursive(&mut self, hash: &Hash) -> Vec<MempoolEntry> {
        if !self.entries.contains_key(hash) {
            return Vec::new();
        }
        let mut doomed: Vec<Hash> = self.calculate_descendants(hash).into_iter().collect();
        doomed.push(*hash);
        // deepest first so every removal is a leaf
        doomed.sort_by_key(|hash| {
            std::cmp::Reverse(self.entries.get(hash).map(|entry| entry.ancestor_count).unwrap_or(0))
        });

        doomed
            .into_iter()
            .filter_map(|hash| self.remove_entry(&hash, false))
            .collect()
    }

    /// Drop confirmed transactions and anything that conflicts with them
    pub fn remove_for_block(&mut self, block: &Block) -> usize {
        let mut removed = 0;
        for tx in &block.transactions {
            let hash = tx.hash();
            if self.remove_entry(&hash, true).is_some() {
                removed += 1;
            }
            for (_, conflict) in self.conflicts_of(tx) {
                removed += self.remove_recursive(&conflict).len();
            }
        }
        if removed > 0 {
            debug!(removed, remaining = self.len(), "removed transactions for block");
        }
        removed
    }

    /// Remove entries that entered the pool before `cutoff`
    pub fn expire(&mut self, cutoff: u64) -> usize {
        let stale: Vec<Hash> = self
            .entries
            .values()
            .filter(|entry| entry.time < cutoff)
            .map(|entry| entry.tx_hash)
            .collect();
        stale
            .iter()
            .map(|hash| self.remove_recursive(hash).len())
            .sum()
    }

    /// Evict the packages with the lowest descendant fee rate until the
    /// pool fits in `limit` bytes
    pub fn trim_to_size(&mut self, limit: usize) -> Vec<Hash> {
        let mut evicted = Vec::new();
        while self.total_size > limit {
            let Some(worst) = self
                .entries
                .values()
                .min_by_key(|entry| (entry.descendant_fee_rate(), std::cmp::Reverse(entry.time)))
                .map(|entry| entry.tx_hash)
            else {
                break;
            };
            evicted.extend(self.remove_recursive(&worst).into_iter().map(|entry| entry.tx_hash));
        }
        evicted
    }

    /// Entries ordered so parents precede children, best fee rate first
    /// among entries at the same depth
    pub fn block_candidates(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.ancestor_count
                .cmp(&b.ancestor_count)
                .then(b.fee_rate().cmp(&a.fee_rate()))
                .then(a.tx_hash.cmp(&b.tx_hash))
        });
        entries
    }

    /// Everything needed to re-admit the pool after a restart
    pub fn snapshot(&self) -> Vec<PersistedTx> {
        self.block_candidates()
            .into_iter()
            .map(|entry| PersistedTx {
                tx: entry.tx.clone(),
                fee: entry.fee,
                time: entry.time,
            })
            .collect()
    }

    fn remove_entry(&mut self, hash: &Hash, update_descendants: bool) -> Option<MempoolEntry> {
        if !self.entries.contains_key(hash) {
            return None;
        }

        let ancestors = self.ancestors_of_pooled(hash);
        let descendants = if update_descendants {
            self.calculate_descendants(hash)
        } else {
            HashSet::new()
        };

        let entry = self.entries.remove(hash)?;

        for ancestor in &ancestors {
            if let Some(parent) = self.entries.get_mut(ancestor) {
                parent.descendant_count -= 1;
                parent.descendant_size -= entry.size;
                parent.descendant_fees -= entry.fee;
            }
        }
        for descendant in &descendants {
            if let Some(child) = self.entries.get_mut(descendant) {
                child.ancestor_count -= 1;
                child.ancestor_size -= entry.size;
                child.ancestor_fees -= entry.fee;
            }
        }

        for prevout in entry.tx.prevouts() {
            if self.spent_by.get(prevout) == Some(hash) {
                self.spent_by.remove(prevout);
            }
        }
        if let Some(parents) = self.parents.remove(hash) {
            for parent in parents {
                if let Some(children) = self.children.get_mut(&parent) {
                    children.remove(hash);
                }
            }
        }
        if let Some(children) = self.children.remove(hash) {
            for child in children {
                if let Some(parents) = self.parents.get_mut(&child) {
                    parents.remove(hash);
                }
            }
        }

        self.total_size -= entry.size;
        Some(entry)
    }

    fn ancestors_of_pooled(&self, hash: &Hash) -> HashSet<Hash> {
        let mut ancestors = HashSet::new();
        let mut pending: Vec<Hash> = self
            .parents
            .get(hash)
            .map(|parents| parents.iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = pending.pop() {
            if !ancestors.insert(next) {
                continue;
            }
            if let Some(parents) = self.parents.get(&next) {
                pending.extend(parents.iter().copied());
            }
        }
        ancestors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, PrivateKey};
    use crate::validation::{Script, TxInput, TxOutput};

    fn spend_of(prevouts: &[OutPoint], amount: i64) -> Transaction {
        let key = PrivateKey::generate().public_key();
        Transaction::new(
            prevouts
                .iter()
                .map(|prevout| TxInput::spend(*prevout, key.clone()))
                .collect(),
            vec![TxOutput::new(amount, Script::pay_to_pubkey_hash(&hash_bytes(b"to")))],
        )
    }

    fn add(pool: &mut TxMempool, tx: Transaction, fee: i64, time: u64) -> Hash {
        let ancestors = pool.calculate_ancestors(&tx);
        let entry = MempoolEntry::new(tx, fee, time, 1, 0.0);
        let hash = entry.tx_hash;
        pool.add_unchecked(entry, &ancestors);
        hash
    }

    #[test]
    fn test_conflicts_and_spent_index() {
        let mut pool = TxMempool::new();
        let outpoint = OutPoint::new(hash_bytes(b"coin"), 0);
        let first = add(&mut pool, spend_of(&[outpoint], 90), 10, 0);

        assert_eq!(pool.spender_of(&outpoint), Some(first));
        let rival = spend_of(&[outpoint], 80);
        assert_eq!(pool.conflicts_of(&rival), vec![(outpoint, first)]);
    }

    #[test]
    fn test_package_accounting() {
        let mut pool = TxMempool::new();
        let parent_tx = spend_of(&[OutPoint::new(hash_bytes(b"coin"), 0)], 90);
        let parent = add(&mut pool, parent_tx, 10, 0);
        let child = add(&mut pool, spend_of(&[OutPoint::new(parent, 0)], 80), 10, 0);

        assert_eq!(pool.get(&parent).unwrap().descendant_count, 2);
        assert_eq!(pool.get(&child).unwrap().ancestor_count, 2);
        assert_eq!(pool.calculate_descendants(&parent), HashSet::from([child]));

        let removed = pool.remove_recursive(&parent);
        assert_eq!(removed.len(), 2);
        assert!(pool.is_empty());
        assert_eq!(pool.total_size(), 0);
    }

    #[test]
    fn test_confirmed_parent_keeps_child() {
        let mut pool = TxMempool::new();
        let parent_tx = spend_of(&[OutPoint::new(hash_bytes(b"coin"), 0)], 90);
        let parent = add(&mut pool, parent_tx.clone(), 10, 0);
        let child = add(&mut pool, spend_of(&[OutPoint::new(parent, 0)], 80), 10, 0);

        let block = Block::new(
            crate::consensus::BlockHeader::new(1, Hash::zero(), Hash::zero(), 0, 0, 0),
            vec![parent_tx],
        );
        assert_eq!(pool.remove_for_block(&block), 1);
        assert!(pool.contains(&child));
        assert_eq!(pool.get(&child).unwrap().ancestor_count, 1);
    }

    #[test]
    fn test_block_evicts_conflicts() {
        let mut pool = TxMempool::new();
        let outpoint = OutPoint::new(hash_bytes(b"coin"), 0);
        add(&mut pool, spend_of(&[outpoint], 90), 10, 0);

        let block = Block::new(
            crate::consensus::BlockHeader::new(1, Hash::zero(), Hash::zero(), 0, 0, 0),
            vec![spend_of(&[outpoint], 70)],
        );
        assert_eq!(pool.remove_for_block(&block), 1);
        assert!(pool.is_empty());
        assert_eq!(pool.spender_of(&outpoint), None);
    }

    #[test]
    fn test_trim_evicts_lowest_fee_rate() {
        let mut pool = TxMempool::new();
        let cheap = add(&mut pool, spend_of(&[OutPoint::new(hash_bytes(b"a"), 0)], 1), 1, 0);
        let rich = add(&mut pool, spend_of(&[OutPoint::new(hash_bytes(b"b"), 0)], 1), 10_000, 0);

        let limit = pool.get(&rich).unwrap().size;
        let evicted = pool.trim_to_size(limit);
        assert_eq!(evicted, vec![cheap]);
        assert!(pool.contains(&rich));
    }

    #[test]
    fn test_expire() {
        let mut pool = TxMempool::new();
        add(&mut pool, spend_of(&[OutPoint::new(hash_bytes(b"a"), 0)], 1), 5, 100);
        let fresh = add(&mut pool, spend_of(&[OutPoint::new(hash_bytes(b"b"), 0)], 1), 5, 500);
        assert_eq!(pool.expire(200), 1);
        assert!(pool.contains(&fresh));
    }
}
