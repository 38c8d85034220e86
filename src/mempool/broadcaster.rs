use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::validation::Transaction;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("relay channel closed")]
    ChannelClosed,
    #[error("relay failed: {0}")]
    Relay(String),
}

/// Propagates transactions the mempool has accepted
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> Result<(), BroadcastError>;
}

/// Logs accepted transactions and does nothing else
#[derive(Debug, Default)]
pub struct LoggingBroadcaster;

#[async_trait]
impl TransactionBroadcaster for LoggingBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<(), BroadcastError> {
        info!(tx = %tx.hash().short(), outputs = tx.outputs.len(), "relaying transaction");
        Ok(())
    }
}

/// Hands accepted transactions to a relay task over a channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: mpsc::UnboundedSender<Transaction>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transaction>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TransactionBroadcaster for ChannelBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<(), BroadcastError> {
        self.sender
            .send(tx.clone())
            .map_err(|_| BroadcastError::ChannelClosed)
    }
}
