use std::collections::HashSet;

use crate::crypto::Hash;
use crate::mempool::TxMempool;
use crate::storage::{CoinStore, CoinView, StoreError, UnspentOutputs};
use crate::validation::Transaction;

/// Coin view for one candidate: confirmed coins from the store overlaid
/// with the outputs of pooled parents. Pooled parents are recorded at
/// `height` so they never count as aged.
///
/// Outputs another pooled transaction already spends stay in the view;
/// the conflict check owns that decision.
pub(crate) async fn load_view(
    pool: &TxMempool,
    store: &dyn CoinStore,
    tx: &Transaction,
    height: u64,
) -> Result<CoinView, StoreError> {
    let mut seen = HashSet::new();
    let mut from_pool = Vec::new();
    let mut from_store: Vec<Hash> = Vec::new();

    for prevout in tx.prevouts() {
        if !seen.insert(prevout.hash) {
            continue;
        }
        match pool.get(&prevout.hash) {
            Some(parent) => from_pool.push(UnspentOutputs::from_transaction(&parent.tx, height)),
            None => from_store.push(prevout.hash),
        }
    }

    let mut view = CoinView::new();
    if !from_store.is_empty() {
        let response = store.fetch_coins(&from_store).await?;
        view.set(response.records.into_iter().flatten());
    }
    view.set(from_pool);
    Ok(view)
}
