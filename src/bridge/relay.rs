//! Relay of bridge messages to their destination chain

use super::{BridgeCodec, BridgeMessage};
use crate::chain::{ChainListener, EventSource};
use crate::error::{RelayerError, RelayerResult};
use crate::store::{BlockStore, TxRecord, TxStatus};
use crate::tx::TxManager;

use ethers::types::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Buffered messages between listeners and handlers
const MESSAGE_BUFFER: usize = 100;

/// Bridge deployment on one chain
#[derive(Clone)]
pub struct BridgeEndpoint {
    pub chain_id: u64,
    pub address: Address,
    pub deployment_block: u64,
    pub poll_interval: Duration,
    pub source: Arc<dyn EventSource>,
}

/// Listens to every configured bridge and relays its messages
pub struct BridgeRelay {
    manager: Arc<TxManager>,
    codec: Arc<BridgeCodec>,
    endpoints: HashMap<u64, BridgeEndpoint>,
    checkpoints: Arc<dyn BlockStore>,
    gas_limit: u64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl BridgeRelay {
    pub fn new(
        manager: Arc<TxManager>,
        codec: Arc<BridgeCodec>,
        endpoints: Vec<BridgeEndpoint>,
        checkpoints: Arc<dyn BlockStore>,
        gas_limit: u64,
    ) -> Self {
        Self {
            manager,
            codec,
            endpoints: endpoints.into_iter().map(|e| (e.chain_id, e)).collect(),
            checkpoints,
            gas_limit,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn one listener per endpoint plus the message dispatcher
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<BridgeMessage>(MESSAGE_BUFFER);

        for endpoint in self.endpoints.values() {
            let listener = ChainListener::new(
                endpoint.chain_id,
                endpoint.address,
                endpoint.deployment_block,
                endpoint.poll_interval,
                endpoint.source.clone(),
                self.codec.clone(),
            )
            .with_checkpoints(self.checkpoints.clone());
            let sink = tx.clone();
            let cancel = self.shutdown.clone();
            self.tracker
                .spawn(async move { listener.listen(sink, cancel).await });
        }
        drop(tx);

        let relay = self.clone();
        self.tracker.spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = relay.shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                let handler = relay.clone();
                relay
                    .tracker
                    .spawn(async move { handler.process_message(msg).await });
            }
        });

        info!("Bridge relay started for {} chains", self.endpoints.len());
    }

    /// Stop listeners and in-flight handlers and wait for them
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Bridge relay stopped");
    }

    /// Submit `release` for a message on its destination chain and wait for the outcome
    pub async fn handle_message(
        &self,
        msg: &BridgeMessage,
        cancel: &CancellationToken,
    ) -> RelayerResult<TxRecord> {
        let destination = self
            .endpoints
            .get(&msg.destination_chain_id)
            .ok_or_else(|| {
                RelayerError::Config(format!(
                    "destination chain {} not found in config",
                    msg.destination_chain_id
                ))
            })?;

        let data = self
            .codec
            .encode_release(msg.destination_contract, &msg.data)?;

        let id = self
            .manager
            .submit_async(destination.chain_id, destination.address, data, self.gas_limit)
            .await?;

        info!(
            "Relaying message from chain {} (tx {:?}) to chain {} as tx {}",
            msg.source_chain_id, msg.tx_hash, msg.destination_chain_id, id
        );

        self.manager.wait_tx_completed(&id, cancel).await
    }

    async fn process_message(&self, msg: BridgeMessage) {
        info!(
            "Handling message from chain {} to chain {} contract {:?}",
            msg.source_chain_id, msg.destination_chain_id, msg.destination_contract
        );

        let outcome = self.handle_message(&msg, &self.shutdown).await;
        if outcome.is_ok() {
            self.mark_handled(&msg).await;
        }

        let result = match outcome {
            Ok(record) => match record.status {
                TxStatus::Succeeded => {
                    info!("Tx {} completed", record.id);
                    "succeeded"
                }
                TxStatus::Failed => {
                    error!("Tx {} failed on chain {}", record.id, record.chain_id);
                    "reverted"
                }
                _ => {
                    error!(
                        "Failed to process tx {}: {}",
                        record.id,
                        record.status_message.unwrap_or_default()
                    );
                    "errored"
                }
            },
            Err(RelayerError::Cancelled) => {
                warn!(
                    "Stopped waiting for message from chain {} (tx {:?})",
                    msg.source_chain_id, msg.tx_hash
                );
                "cancelled"
            }
            Err(e) => {
                error!(
                    "Failed to relay message from chain {} (tx {:?}): {}",
                    msg.source_chain_id, msg.tx_hash, e
                );
                "rejected"
            }
        };

        crate::metrics::record_relay_message(
            msg.source_chain_id,
            msg.destination_chain_id,
            result,
        );
    }

    /// Move the source listener's checkpoint past the message's block
    async fn mark_handled(&self, msg: &BridgeMessage) {
        let (Some(block_number), Some(source)) = (
            msg.block_number,
            self.endpoints.get(&msg.source_chain_id),
        ) else {
            return;
        };

        if let Err(e) = self
            .checkpoints
            .set_handled_block(msg.source_chain_id, source.address, block_number + 1)
            .await
        {
            error!(
                "Failed to store handled block {} for chain {}: {}",
                block_number, msg.source_chain_id, e
            );
        }
    }
}
