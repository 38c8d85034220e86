//! End-to-end chain tests on regtest
//!
//! Blocks are assembled, mined and connected through the public API so the
//! full rule pipeline runs against a real coin store.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

use splitfee_core::constants::COIN;
use splitfee_core::consensus::{block_subsidy, Block, ChainTip, ConsensusError, ConsensusParams};
use splitfee_core::crypto::{hash_bytes, Hash};
use splitfee_core::mempool::{MempoolSettings, MempoolValidator};
use splitfee_core::mining::{BlockAssembler, Miner, MiningResult};
use splitfee_core::storage::{
    ChainState, CoinStore, CoinView, FetchCoinsResponse, MemoryCoinStore, SledCoinStore, StoreError, TipState,
    UnspentOutputs,
};
use splitfee_core::validation::{Amount, Script, Transaction};
use splitfee_core::wallet::{SpendableCoin, Wallet};

struct TestChain {
    params: Arc<ConsensusParams>,
    store: Arc<dyn CoinStore>,
    chain: ChainState,
    wallet: Wallet,
    reward_script: Script,
}

impl TestChain {
    async fn new(params: ConsensusParams) -> Self {
        Self::with_store(params, Arc::new(MemoryCoinStore::new())).await
    }

    async fn with_store(params: ConsensusParams, store: Arc<dyn CoinStore>) -> Self {
        let params = Arc::new(params);
        let chain = ChainState::open(Arc::clone(&params), Arc::clone(&store)).await.unwrap();
        let mut wallet = Wallet::new();
        let reward_script = wallet.generate_key().script();
        Self {
            params,
            store,
            chain,
            wallet,
            reward_script,
        }
    }

    fn tip(&self) -> ChainTip {
        self.chain.tip().clone()
    }

    fn next_time(&self) -> u64 {
        self.params.genesis.header.timestamp + 600 * (self.chain.height() + 1)
    }

    /// Assemble and mine a proof-of-work block on the current tip
    async fn template(&self, txs: Vec<Transaction>) -> Block {
        let block = BlockAssembler::new(&self.params, self.reward_script.clone())
            .assemble_from_store(self.store.as_ref(), &self.tip(), txs, self.next_time())
            .await
            .unwrap();
        mine(block)
    }

    async fn connect(&mut self, block: &Block) -> Result<ChainTip, ConsensusError> {
        let time = block.header.timestamp;
        self.chain.connect_block_at(block, None, time).await
    }

    async fn mine_empty(&mut self) -> Block {
        let block = self.template(Vec::new()).await;
        self.connect(&block).await.unwrap();
        block
    }

    /// Our coins created by the given transactions
    async fn coins_from(&self, tx_hashes: &[Hash]) -> Vec<SpendableCoin> {
        let response = self.store.fetch_coins(tx_hashes).await.unwrap();
        let mut view = CoinView::new();
        view.set(response.records.into_iter().flatten());
        self.wallet.spendable_coins(&view, self.chain.height(), &self.params)
    }

    async fn payment(&self, funding: &Block, recipient: &[u8], amount: Amount, seed: u64) -> Transaction {
        let coins = self.coins_from(&[funding.transactions[0].hash()]).await;
        self.wallet
            .create_transaction(
                &coins,
                &hash_bytes(recipient),
                amount,
                &self.params,
                MempoolSettings::default().min_relay_fee_per_kb,
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap()
    }
}

fn mine(block: Block) -> Block {
    match Miner::new().mine_block(block) {
        MiningResult::Success(block) => block,
        other => panic!("mining failed: {other:?}"),
    }
}

/// Same block with a new timestamp, mined again
fn retimed(block: &Block, timestamp: u64) -> Block {
    let mut block = block.clone();
    block.header.timestamp = timestamp;
    mine(block)
}

/// Blocks mined on a throwaway node, ready to be connected elsewhere
async fn mined_blocks(count: usize) -> Vec<Block> {
    let mut source = TestChain::new(ConsensusParams::regtest()).await;
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        blocks.push(source.mine_empty().await);
    }
    blocks
}

#[derive(Clone, Copy)]
enum Warmup {
    Record,
    /// Leave a task running that never completes
    Stall,
    /// Spawn a task that panics
    Fail,
}

/// Memory store that records what it is asked to warm
struct WarmupStore {
    inner: MemoryCoinStore,
    mode: Warmup,
    requests: Mutex<Vec<Vec<Hash>>>,
}

impl WarmupStore {
    fn new(mode: Warmup) -> Self {
        Self {
            inner: MemoryCoinStore::new(),
            mode,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CoinStore for WarmupStore {
    async fn fetch_coins(&self, ids: &[Hash]) -> Result<FetchCoinsResponse, StoreError> {
        self.inner.fetch_coins(ids).await
    }

    async fn put(&self, records: Vec<UnspentOutputs>, new_tip: Hash) -> Result<(), StoreError> {
        self.inner.put(records, new_tip).await
    }

    async fn delete(&self, ids: &[Hash]) -> Result<(), StoreError> {
        self.inner.delete(ids).await
    }

    async fn tip_hash(&self) -> Result<Hash, StoreError> {
        self.inner.tip_hash().await
    }

    async fn set_tip_hash(&self, tip: Hash) -> Result<(), StoreError> {
        self.inner.set_tip_hash(tip).await
    }

    async fn tip_state(&self) -> Result<Option<TipState>, StoreError> {
        self.inner.tip_state().await
    }

    async fn set_tip_state(&self, state: &TipState) -> Result<(), StoreError> {
        self.inner.set_tip_state(state).await
    }

    fn prefetch(&self, ids: Vec<Hash>) {
        self.requests.lock().unwrap().push(ids);
        match self.mode {
            Warmup::Record => {}
            Warmup::Stall => {
                tokio::spawn(std::future::pending::<()>());
            }
            Warmup::Fail => {
                tokio::spawn(async { panic!("coin warmup failed") });
            }
        }
    }
}

fn fee_paid(tx: &Transaction, funding: Amount) -> Amount {
    funding - tx.total_output_value().unwrap()
}

#[tokio::test]
async fn test_payment_through_mempool_pays_fee_split() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    let funding = node.mine_empty().await;

    let mempool = MempoolValidator::new(
        Arc::clone(&node.params),
        Arc::clone(&node.store),
        MempoolSettings::default(),
        node.tip(),
    );
    let payment = node.payment(&funding, b"bob", 10 * COIN, 1).await;
    let payment_hash = mempool.accept_to_memory_pool(payment.clone()).await.unwrap();

    let txs: Vec<Transaction> = mempool.candidates().await.into_iter().map(|entry| entry.tx).collect();
    assert_eq!(txs, vec![payment.clone()]);

    let block = node.template(txs).await;
    let tip = node.connect(&block).await.unwrap();
    assert_eq!(tip.height, 2);

    // Expected fee is 0.1% of the 10 coins sent; half goes to the recipient
    let coinbase = block.coinbase().unwrap();
    let recipient = node.params.fee_recipients_at(2)[0];
    assert_eq!(coinbase.outputs[1].amount, 500_000);
    assert_eq!(coinbase.outputs[1].script_pubkey.destination(), Some(recipient));

    let subsidy = block_subsidy(&node.params, 2);
    let fee = fee_paid(&payment, block_subsidy(&node.params, 1));
    assert!(fee >= 1_000_000);
    assert_eq!(coinbase.total_output_value(), Some(subsidy + fee));

    mempool.block_connected(&block, tip).await;
    assert!(mempool.is_empty().await);

    let response = node.store.fetch_coins(&[payment_hash]).await.unwrap();
    let record = response.records[0].as_ref().unwrap();
    assert_eq!(record.output(0).unwrap().amount, 10 * COIN);

    let spent = node.store.fetch_coins(&[funding.transactions[0].hash()]).await.unwrap();
    assert!(spent.records[0].as_ref().map_or(true, |record| record.output(0).is_none()));
}

#[tokio::test]
async fn test_underpaid_fee_output_rejected() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    let funding = node.mine_empty().await;
    let payment = node.payment(&funding, b"bob", 10 * COIN, 1).await;

    let honest = node.template(vec![payment]).await;

    let mut short = honest.clone();
    short.transactions[0].outputs[1].amount -= 1;
    short.transactions[0].outputs[0].amount += 1;
    short.update_merkle_root();
    let short = mine(short);
    let err = node.connect(&short).await.unwrap_err();
    assert_eq!(err.code(), "bad-txns-fee-outofrange");

    let mut missing = honest.clone();
    let share = missing.transactions[0].outputs[1].amount;
    missing.transactions[0].outputs.truncate(1);
    missing.transactions[0].outputs[0].amount += share;
    missing.update_merkle_root();
    let missing = mine(missing);
    let err = node.connect(&missing).await.unwrap_err();
    assert_eq!(err.code(), "bad-blk-feeoutput");

    // Rejected blocks leave the chain untouched
    assert_eq!(node.chain.height(), 1);
    node.connect(&honest).await.unwrap();
    assert_eq!(node.chain.height(), 2);
}

#[tokio::test]
async fn test_created_value_rejected() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    node.mine_empty().await;

    let mut greedy = node.template(Vec::new()).await;
    greedy.transactions[0].outputs[0].amount += 1;
    greedy.update_merkle_root();
    let greedy = mine(greedy);

    let err = node.connect(&greedy).await.unwrap_err();
    assert_eq!(err.code(), "bad-cb-amount");
}

#[tokio::test]
async fn test_wallet_skips_immature_reward() {
    let mut params = ConsensusParams::regtest();
    params.coinbase_maturity = 5;
    let mut node = TestChain::new(params).await;
    let funding = node.mine_empty().await;

    assert!(node.coins_from(&[funding.transactions[0].hash()]).await.is_empty());
}

#[tokio::test]
async fn test_block_evicts_conflicting_pool_transaction() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    let funding = node.mine_empty().await;

    let mempool = MempoolValidator::new(
        Arc::clone(&node.params),
        Arc::clone(&node.store),
        MempoolSettings::default(),
        node.tip(),
    );
    let pooled = node.payment(&funding, b"bob", 10 * COIN, 1).await;
    let pooled_hash = mempool.accept_to_memory_pool(pooled).await.unwrap();

    let confirmed = node.payment(&funding, b"carol", 20 * COIN, 2).await;
    assert!(mempool.accept_to_memory_pool(confirmed.clone()).await.is_err());

    let block = node.template(vec![confirmed]).await;
    let tip = node.connect(&block).await.unwrap();
    mempool.block_connected(&block, tip).await;

    assert!(!mempool.contains(&pooled_hash).await);
    assert!(mempool.is_empty().await);
}

#[tokio::test]
async fn test_stake_block_after_last_pow_height() {
    let mut params = ConsensusParams::regtest();
    params.last_pow_height = 2;
    let mut node = TestChain::new(params).await;
    let funding = node.mine_empty().await;
    node.mine_empty().await;

    // A mined block is not acceptable once stake blocks take over
    let pow = node.template(Vec::new()).await;
    assert_eq!(node.connect(&pow).await.unwrap_err().code(), "bad-cs-missing");

    let coins = node.coins_from(&[funding.transactions[0].hash()]).await;
    let stake = coins
        .iter()
        .find(|coin| coin.value() == 50 * COIN)
        .unwrap()
        .clone();
    let staker = node
        .wallet
        .key_for(&stake.script().destination().unwrap())
        .unwrap()
        .clone();

    let block = BlockAssembler::new(&node.params, node.reward_script.clone())
        .assemble_pos(&node.tip(), Vec::new(), &CoinView::new(), &stake, &staker, node.next_time())
        .unwrap();
    assert!(block.is_proof_of_stake());

    let tip = node.connect(&block).await.unwrap();
    assert_eq!(tip.height, 3);

    let coinstake = block.coinstake().unwrap();
    assert_eq!(coinstake.outputs[1].amount, 50 * COIN + node.params.pos_reward);
    assert_eq!(coinstake.outputs[2].amount, 0);
    assert_eq!(block.coinbase().unwrap().total_output_value(), Some(0));
}

#[tokio::test]
async fn test_stake_block_with_bad_signature_rejected() {
    let mut params = ConsensusParams::regtest();
    params.last_pow_height = 1;
    let mut node = TestChain::new(params).await;
    let funding = node.mine_empty().await;

    let coins = node.coins_from(&[funding.transactions[0].hash()]).await;
    let stake = coins[0].clone();
    let staker = node
        .wallet
        .key_for(&stake.script().destination().unwrap())
        .unwrap()
        .clone();

    let mut block = BlockAssembler::new(&node.params, node.reward_script.clone())
        .assemble_pos(&node.tip(), Vec::new(), &CoinView::new(), &stake, &staker, node.next_time())
        .unwrap();
    block.header.timestamp += 1;

    assert_eq!(node.connect(&block).await.unwrap_err().code(), "bad-blk-signature");
}

#[tokio::test]
async fn test_sled_store_resumes_at_saved_tip() {
    let dir = tempfile::tempdir().unwrap();
    let sled = SledCoinStore::open(dir.path().join("coins")).unwrap();
    let store: Arc<dyn CoinStore> = Arc::new(sled.clone());

    let mut node = TestChain::with_store(ConsensusParams::regtest(), Arc::clone(&store)).await;
    let funding_hash = node.mine_empty().await.transactions[0].hash();
    node.mine_empty().await;
    assert!(!sled.is_empty());

    let response = sled.fetch_coins(&[funding_hash]).await.unwrap();
    assert!(response.records[0].is_some());
    assert_eq!(response.block_hash, node.chain.tip().hash);

    let before = node.chain.tip_state();
    drop(node);

    let mut resumed = TestChain::with_store(ConsensusParams::regtest(), store).await;
    assert_eq!(resumed.chain.height(), 2);
    assert_eq!(resumed.chain.tip_state(), before);

    let tip = resumed.mine_empty().await;
    assert_eq!(tip.header.prev_hash, before.tip.hash);
    assert_eq!(resumed.chain.height(), 3);
}

#[tokio::test]
async fn test_connect_blocks_warms_each_successor() {
    let blocks = mined_blocks(3).await;
    let store = Arc::new(WarmupStore::new(Warmup::Record));
    let mut chain = ChainState::open(Arc::new(ConsensusParams::regtest()), store.clone())
        .await
        .unwrap();

    let tip = chain.connect_blocks(&blocks).await.unwrap();
    assert_eq!(tip.height, 3);
    assert_eq!(tip.hash, blocks[2].hash());

    let requests = store.requests.lock().unwrap().clone();
    assert_eq!(requests, vec![CoinView::ids_for(&blocks[1]), CoinView::ids_for(&blocks[2])]);
}

#[tokio::test]
async fn test_stalled_or_failed_warmup_does_not_block_connect() {
    for mode in [Warmup::Stall, Warmup::Fail] {
        let blocks = mined_blocks(2).await;
        let store = Arc::new(WarmupStore::new(mode));
        let mut chain = ChainState::open(Arc::new(ConsensusParams::regtest()), store.clone())
            .await
            .unwrap();

        let tip = chain
            .connect_block_at(&blocks[0], Some(&blocks[1]), blocks[0].header.timestamp)
            .await
            .unwrap();
        assert_eq!(tip.height, 1);
        assert_eq!(store.requests.lock().unwrap().len(), 1);
        assert!(store.fetch_coins(&[blocks[0].transactions[0].hash()]).await.unwrap().records[0].is_some());

        chain.connect_block_at(&blocks[1], None, blocks[1].header.timestamp).await.unwrap();
        assert_eq!(chain.height(), 2);
    }
}

#[tokio::test]
async fn test_assume_valid_block_skips_fee_rule_but_commits_coins() {
    let mut params = ConsensusParams::regtest();
    params.assume_valid_height = 2;
    let mut node = TestChain::new(params).await;
    let funding = node.mine_empty().await;
    let payment = node.payment(&funding, b"bob", 10 * COIN, 1).await;
    let payment_hash = payment.hash();

    let mut missing = node.template(vec![payment]).await;
    let share = missing.transactions[0].outputs[1].amount;
    missing.transactions[0].outputs.truncate(1);
    missing.transactions[0].outputs[0].amount += share;
    missing.update_merkle_root();
    let missing = mine(missing);

    let tip = node.connect(&missing).await.unwrap();
    assert_eq!(tip.height, 2);

    let response = node.store.fetch_coins(&[payment_hash]).await.unwrap();
    assert_eq!(response.records[0].as_ref().unwrap().output(0).unwrap().amount, 10 * COIN);
    let spent = node.store.fetch_coins(&[funding.transactions[0].hash()]).await.unwrap();
    assert!(spent.records[0].as_ref().map_or(true, |record| record.output(0).is_none()));

    // Past the assume-valid height the fee rule applies again
    let mut unpaid = node.template(Vec::new()).await;
    unpaid.transactions[0].outputs.truncate(1);
    unpaid.update_merkle_root();
    let unpaid = mine(unpaid);
    assert_eq!(node.connect(&unpaid).await.unwrap_err().code(), "bad-blk-feeoutput");
}

#[tokio::test]
async fn test_checkpoint_mismatch_rejected() {
    let expected = mined_blocks(1).await.remove(0);

    let mut params = ConsensusParams::regtest();
    params.checkpoints.insert(1, expected.hash());
    let mut node = TestChain::new(params).await;

    // Our own block pays a different reward key, so its hash differs
    let other = node.template(Vec::new()).await;
    assert_eq!(node.connect(&other).await.unwrap_err().code(), "checkpoint-mismatch");
    assert_eq!(node.chain.height(), 0);

    node.connect(&expected).await.unwrap();
    assert_eq!(node.chain.height(), 1);
}

#[tokio::test]
async fn test_header_time_bounds() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    let block = node.template(Vec::new()).await;

    let stale = retimed(&block, node.tip().median_time_past);
    assert_eq!(node.connect(&stale).await.unwrap_err().code(), "time-too-old");

    let max_future = node.params.max_future_block_time;
    let early_clock = block.header.timestamp - max_future - 1;
    let err = node.chain.connect_block_at(&block, None, early_clock).await.unwrap_err();
    assert_eq!(err.code(), "time-too-new");

    let at_limit = block.header.timestamp - max_future;
    node.chain.connect_block_at(&block, None, at_limit).await.unwrap();
    assert_eq!(node.chain.height(), 1);
}

#[tokio::test]
async fn test_wrong_difficulty_bits_rejected() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    let mut harder = node.template(Vec::new()).await;
    assert_eq!(harder.header.bits, 0x207fffff);
    harder.header.bits = 0x2000ffff;
    let harder = mine(harder);

    assert_eq!(node.connect(&harder).await.unwrap_err().code(), "bad-diffbits");
    assert_eq!(node.chain.height(), 0);
}

#[tokio::test]
async fn test_fee_recipient_mines_with_single_reward_output() {
    let mut node = TestChain::new(ConsensusParams::regtest()).await;
    let funding = node.mine_empty().await;
    let payment = node.payment(&funding, b"bob", 10 * COIN, 1).await;

    let recipient = node.params.fee_recipients_at(2)[0];
    node.reward_script = Script::pay_to_pubkey_hash(&recipient);
    let block = node.template(vec![payment.clone()]).await;
    let tip = node.connect(&block).await.unwrap();
    assert_eq!(tip.height, 2);

    let coinbase = block.coinbase().unwrap();
    assert_eq!(coinbase.outputs.len(), 1);
    assert_eq!(coinbase.outputs[0].script_pubkey.destination(), Some(recipient));
    let fee = fee_paid(&payment, block_subsidy(&node.params, 1));
    assert_eq!(coinbase.outputs[0].amount, block_subsidy(&node.params, 2) + fee);
}
