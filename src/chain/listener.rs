//! Bridge event listener polling `Msg` logs in bounded block windows

use super::EventSource;
use crate::bridge::{BridgeCodec, BridgeMessage};
use crate::error::RelayerResult;
use crate::store::BlockStore;

use ethers::types::{Address, Filter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum number of blocks requested in a single `eth_getLogs` call
pub const MAX_BLOCK_RANGE: u64 = 1000;

/// Listens for bridge messages on a specific chain
pub struct ChainListener {
    chain_id: u64,
    bridge: Address,
    deployment_block: u64,
    poll_interval: Duration,
    source: Arc<dyn EventSource>,
    codec: Arc<BridgeCodec>,
    checkpoints: Option<Arc<dyn BlockStore>>,
}

impl ChainListener {
    pub fn new(
        chain_id: u64,
        bridge: Address,
        deployment_block: u64,
        poll_interval: Duration,
        source: Arc<dyn EventSource>,
        codec: Arc<BridgeCodec>,
    ) -> Self {
        Self {
            chain_id,
            bridge,
            deployment_block,
            poll_interval,
            source,
            codec,
            checkpoints: None,
        }
    }

    /// Resume from the last handled block recorded in `store`
    pub fn with_checkpoints(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Poll until cancelled, forwarding every decoded message to `sink`
    pub async fn listen(&self, sink: mpsc::Sender<BridgeMessage>, cancel: CancellationToken) {
        let mut next_block = match self.start_block(&cancel).await {
            Some(block) => block,
            None => return,
        };

        info!(
            "Listening for bridge messages on chain {} from block {} (bridge {:?})",
            self.chain_id, next_block, self.bridge
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let head = match self.source.block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("Failed to get block number for chain {}: {}", self.chain_id, e);
                    if !self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            if head < next_block {
                if !self.pause(&cancel).await {
                    break;
                }
                continue;
            }

            let to_block = std::cmp::min(head, next_block + MAX_BLOCK_RANGE - 1);
            debug!(
                "Chain {}: processing blocks {} to {}",
                self.chain_id, next_block, to_block
            );

            match self.fetch_messages(next_block, to_block).await {
                Ok(messages) => {
                    for msg in messages {
                        if sink.send(msg).await.is_err() {
                            debug!("Message sink closed for chain {}", self.chain_id);
                            return;
                        }
                    }

                    next_block = to_block + 1;
                    crate::metrics::record_blocks_processed(self.chain_id, to_block);
                }
                Err(e) => {
                    // Checkpoint stays put, the window is retried
                    warn!("Failed to get logs for chain {}: {}", self.chain_id, e);
                    if !self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            }

            // Catch up without waiting while behind the head
            if to_block < head {
                continue;
            }

            if !self.pause(&cancel).await {
                break;
            }
        }

        info!("Listener for chain {} stopped", self.chain_id);
    }

    /// Stored checkpoint (never below the deployment block), else the deployment
    /// block, else the current head
    async fn start_block(&self, cancel: &CancellationToken) -> Option<u64> {
        if let Some(store) = &self.checkpoints {
            loop {
                match store.get_handled_block(self.chain_id, self.bridge).await {
                    Ok(Some(block)) => return Some(block.max(self.deployment_block)),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            "Failed to load checkpoint for chain {}: {}",
                            self.chain_id, e
                        );
                        if !self.pause(cancel).await {
                            return None;
                        }
                    }
                }
            }
        }

        if self.deployment_block > 0 {
            return Some(self.deployment_block);
        }

        loop {
            match self.source.block_number().await {
                Ok(head) => return Some(head),
                Err(e) => {
                    warn!(
                        "Failed to get start block for chain {}: {}",
                        self.chain_id, e
                    );
                    if !self.pause(cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn fetch_messages(&self, from_block: u64, to_block: u64) -> RelayerResult<Vec<BridgeMessage>> {
        let filter = Filter::new()
            .address(self.bridge)
            .topic0(self.codec.msg_topic())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.source.logs(&filter).await?;

        let messages = logs
            .iter()
            .filter_map(|log| match self.codec.decode_msg(self.chain_id, log) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!(
                        "Skipping undecodable log on chain {} (tx {:?}): {}",
                        self.chain_id, log.transaction_hash, e
                    );
                    None
                }
            })
            .collect();

        Ok(messages)
    }

    /// Sleep one poll interval; false when cancelled
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }
}
