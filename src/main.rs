//! Fee-split node
//!
//! Usage: `splitfee-node [CONFIG.json] [--mine] [--import BLOCKS.bin]`
//!
//! `--import` connects a bincode-encoded list of consecutive blocks before
//! the node starts serving.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use splitfee_core::config::NodeSettings;
use splitfee_core::consensus::{Block, ConsensusParams};
use splitfee_core::mempool::{FileMempoolPersistence, LoggingBroadcaster, MempoolValidator};
use splitfee_core::mining::{BlockAssembler, Miner, MiningResult};
use splitfee_core::storage::{unix_now, CachedCoinStore, ChainState, CoinStore, SledCoinStore};
use splitfee_core::validation::Script;
use splitfee_core::wallet::Wallet;

/// Room left in a block for the coinbase
const COINBASE_RESERVE: usize = 1_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config_path: Option<PathBuf> = None;
    let mut import_path: Option<PathBuf> = None;
    let mut mine = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mine" => mine = true,
            "--import" => {
                let path = args.next().ok_or("--import needs a file")?;
                import_path = Some(PathBuf::from(path));
            }
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }

    let settings = NodeSettings::load_or_default(config_path.as_deref())?;
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&settings.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let params = Arc::new(ConsensusParams::for_network(settings.network));
    info!(network = ?settings.network, data_dir = %settings.data_dir.display(), "starting node");

    let disk: Arc<dyn CoinStore> = Arc::new(SledCoinStore::open(settings.coins_path())?);
    let store: Arc<dyn CoinStore> = Arc::new(CachedCoinStore::new(disk, settings.coin_cache_capacity));

    let mut chain = ChainState::open(Arc::clone(&params), Arc::clone(&store)).await?;
    info!(height = chain.height(), tip = %chain.tip().hash.short(), "chain state ready");

    if let Some(path) = import_path {
        let blocks: Vec<Block> = bincode::deserialize(&std::fs::read(&path)?)?;
        let tip = chain.connect_blocks(&blocks).await?;
        info!(blocks = blocks.len(), height = tip.height, path = %path.display(), "imported blocks");
    }

    let mempool = Arc::new(
        MempoolValidator::new(
            Arc::clone(&params),
            Arc::clone(&store),
            settings.mempool.clone(),
            chain.tip().clone(),
        )
        .with_broadcaster(Arc::new(LoggingBroadcaster)),
    );
    let chain = Arc::new(Mutex::new(chain));

    let persistence = FileMempoolPersistence::new(settings.mempool_path());
    if settings.mempool.persist {
        if let Err(e) = mempool.load_persisted(&persistence).await {
            warn!(error = %e, "could not load persisted mempool");
        }
    }

    let miner = Miner::new();
    if mine {
        let wallet_path = settings.wallet_path();
        let wallet = Wallet::load_or_create(&wallet_path)?;
        let reward_script = wallet.primary_script().ok_or("mining wallet has no keys")?;
        info!(
            destination = ?reward_script.destination(),
            wallet = %wallet_path.display(),
            "mining enabled"
        );

        tokio::spawn(mining_loop(
            Arc::clone(&params),
            Arc::clone(&chain),
            Arc::clone(&mempool),
            miner.clone(),
            reward_script,
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    miner.stop();

    if settings.mempool.persist {
        match mempool.save_to(&persistence).await {
            Ok(count) => info!(transactions = count, "saved mempool"),
            Err(e) => error!(error = %e, "failed to save mempool"),
        }
    }
    Ok(())
}

async fn mining_loop(
    params: Arc<ConsensusParams>,
    chain: Arc<Mutex<ChainState>>,
    mempool: Arc<MempoolValidator>,
    miner: Miner,
    reward_script: Script,
) {
    let assembler = BlockAssembler::new(&params, reward_script);
    let budget = params.max_block_size.saturating_sub(COINBASE_RESERVE);

    loop {
        let (tip, store) = {
            let chain = chain.lock().await;
            (chain.tip().clone(), chain.store())
        };

        let mut used = 0;
        let txs: Vec<_> = mempool
            .candidates()
            .await
            .into_iter()
            .take_while(|entry| {
                used += entry.size;
                used <= budget
            })
            .map(|entry| entry.tx)
            .collect();

        let template = match assembler.assemble_from_store(store.as_ref(), &tip, txs, unix_now()).await {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "could not assemble block");
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let worker = miner.clone();
        let result = match tokio::task::spawn_blocking(move || worker.mine_block(template)).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "mining worker failed");
                return;
            }
        };

        match result {
            MiningResult::Success(block) => {
                let mut chain = chain.lock().await;
                match chain.connect_block(&block, None).await {
                    Ok(tip) => mempool.block_connected(&block, tip).await,
                    Err(e) => warn!(code = e.code(), error = %e, "mined block rejected"),
                }
            }
            MiningResult::Interrupted => return,
            MiningResult::Exhausted => sleep(Duration::from_millis(100)).await,
        }
    }
}
