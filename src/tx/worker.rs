//! Per-record broadcast, confirm and bump loop

use super::gas::{next_gas_price, MAX_ATTEMPTS};
use super::manager::TxManager;
use crate::chain::ChainClient;
use crate::error::{RelayerError, RelayerResult};
use crate::store::{SignedTx, TxRecord, TxStatus};

use chrono::Utc;
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionReceipt, TransactionRequest, H256, U256, U64};
use ethers::utils::keccak256;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded retries for the final status write
const TERMINAL_WRITE_ATTEMPTS: u32 = 5;

enum Confirmation {
    Mined(TransactionReceipt),
    NotMined,
    Cancelled,
}

/// Drives a single record to a terminal status
pub(crate) struct TxWorker {
    manager: Arc<TxManager>,
    record: TxRecord,
    client: Arc<dyn ChainClient>,
    cancel: CancellationToken,
    /// Every hash broadcast for this record, oldest first
    hashes: Vec<H256>,
    /// Price of the last attempt, broadcast or not
    last_price: Option<U256>,
}

impl TxWorker {
    pub(crate) fn new(
        manager: Arc<TxManager>,
        client: Arc<dyn ChainClient>,
        record: TxRecord,
        cancel: CancellationToken,
    ) -> Self {
        let hashes = record.signed_tx.iter().map(|tx| tx.hash).collect();
        let last_price = record.signed_tx.as_ref().map(|tx| tx.gas_price);

        Self {
            manager,
            record,
            client,
            cancel,
            hashes,
            last_price,
        }
    }

    pub(crate) async fn run(mut self) {
        let id = self.record.id.clone();
        debug!("Start processing tx {} on chain {}", id, self.record.chain_id);

        // A recovered record may already be mined
        if !self.hashes.is_empty() {
            if let Some(receipt) = self.check_receipts().await {
                self.complete_with_receipt(receipt).await;
                return;
            }
        }

        let nonce = match self.record.nonce {
            Some(nonce) => nonce,
            None => match self.acquire_nonce().await {
                Ok(Some(nonce)) => nonce,
                Ok(None) => return,
                Err(e) => {
                    error!("Failed to get nonce for tx {}: {}", id, e);
                    self.finish(TxStatus::Errored, Some(e.to_string()), None)
                        .await;
                    return;
                }
            },
        };
        self.record.nonce = Some(nonce);

        for attempt in 1..=MAX_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return;
            }

            if let Err(e) = self.broadcast(nonce, attempt).await {
                warn!(
                    "Broadcast attempt {} for tx {} (nonce {}) failed: {}",
                    attempt, id, nonce, e
                );
            }

            match self.wait_mined().await {
                Confirmation::Mined(receipt) => {
                    self.complete_with_receipt(receipt).await;
                    return;
                }
                Confirmation::Cancelled => {
                    debug!("Worker for tx {} cancelled", id);
                    return;
                }
                Confirmation::NotMined if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "Tx {} not mined after attempt {}, bumping gas price",
                        id, attempt
                    );
                }
                Confirmation::NotMined => {}
            }
        }

        error!("Tx {} not mined after {} attempts", id, MAX_ATTEMPTS);
        self.finish(
            TxStatus::Errored,
            Some(RelayerError::NotConfirmed.to_string()),
            None,
        )
        .await;
    }

    /// Allocate a nonce, retrying transient failures; `None` when cancelled
    async fn acquire_nonce(&self) -> RelayerResult<Option<u64>> {
        let chain_id = self.record.chain_id;
        let mut last_error = None;

        for _ in 0..MAX_ATTEMPTS {
            match self
                .manager
                .nonces
                .acquire(chain_id, self.client.as_ref())
                .await
            {
                Ok(nonce) => return Ok(Some(nonce)),
                Err(e) => {
                    warn!(
                        "Failed to get nonce for tx {} on chain {}: {}",
                        self.record.id, chain_id, e
                    );
                    last_error = Some(e);
                }
            }

            if !self.pause(self.manager.poll_interval).await {
                return Ok(None);
            }
        }

        Err(last_error.unwrap_or(RelayerError::ChainConnection {
            chain_id,
            message: "could not fetch nonce".to_string(),
        }))
    }

    /// Price, sign, send and persist one attempt
    async fn broadcast(&mut self, nonce: u64, attempt: u64) -> RelayerResult<()> {
        let suggested = self.client.suggest_gas_price().await?;
        let gas_price = next_gas_price(self.last_price, suggested, attempt);
        self.last_price = Some(gas_price);

        let signed = self.sign(nonce, gas_price).await?;
        debug!(
            "Broadcasting tx {} attempt {}: nonce {}, gas price {}, hash {:?}",
            self.record.id, attempt, nonce, gas_price, signed.hash
        );

        // Tracked before sending: a send that errors may still have reached the pool
        if !self.hashes.contains(&signed.hash) {
            self.hashes.push(signed.hash);
        }

        match self.client.send_transaction(&signed).await {
            Ok(hash) => {
                if hash != signed.hash {
                    warn!(
                        "Node reported hash {:?} for tx {}, expected {:?}",
                        hash, self.record.id, signed.hash
                    );
                }
            }
            Err(e @ RelayerError::ChainConnection { .. }) => {
                // Outcome unknown, keep the signed tx so a restart still polls it
                self.persist_signed(signed).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        crate::metrics::record_tx_broadcast(self.record.chain_id, attempt);
        self.persist_signed(signed).await;

        info!(
            "Tx {} broadcast on chain {} (attempt {}, nonce {}, gas price {})",
            self.record.id, self.record.chain_id, attempt, nonce, gas_price
        );
        Ok(())
    }

    async fn persist_signed(&mut self, signed: SignedTx) {
        if let Err(e) = self
            .manager
            .store
            .update_raw_tx(&self.record.id, signed.clone())
            .await
        {
            error!("Failed to persist broadcast of tx {}: {}", self.record.id, e);
        }
        self.record.signed_tx = Some(signed);
        self.manager.notify(&self.record.id);
    }

    /// Build and sign the legacy transaction for this record
    async fn sign(&self, nonce: u64, gas_price: U256) -> RelayerResult<SignedTx> {
        let chain_id = self.record.chain_id;
        let wallet = (self.manager.signer)(chain_id)?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(wallet.address())
            .to(self.record.to)
            .data(self.record.data.clone())
            .gas(self.record.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(chain_id)
            .into();

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Signer {
                chain_id,
                message: e.to_string(),
            })?;

        let raw = tx.rlp_signed(&signature);
        Ok(SignedTx {
            hash: H256::from(keccak256(&raw)),
            raw,
            nonce,
            gas_price,
        })
    }

    /// Poll receipts for up to one bump interval
    async fn wait_mined(&self) -> Confirmation {
        let deadline = Instant::now() + self.manager.bump_interval;

        loop {
            if let Some(receipt) = self.check_receipts().await {
                return Confirmation::Mined(receipt);
            }

            let now = Instant::now();
            if now >= deadline {
                return Confirmation::NotMined;
            }

            let pause = std::cmp::min(self.manager.poll_interval, deadline - now);
            if !self.pause(pause).await {
                return Confirmation::Cancelled;
            }
        }
    }

    /// Receipt of any broadcast of this record, newest first
    async fn check_receipts(&self) -> Option<TransactionReceipt> {
        for hash in self.hashes.iter().rev() {
            match self.client.transaction_receipt(*hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => debug!("Tx {} ({:?}) not yet mined", self.record.id, hash),
                Err(e) => debug!(
                    "Receipt lookup for tx {} ({:?}) failed: {}",
                    self.record.id, hash, e
                ),
            }
        }
        None
    }

    async fn complete_with_receipt(&mut self, receipt: TransactionReceipt) {
        if receipt.status == Some(U64::from(1)) {
            info!(
                "Tx {} succeeded in block {:?} ({:?})",
                self.record.id, receipt.block_number, receipt.transaction_hash
            );
            self.finish(TxStatus::Succeeded, None, Some(receipt)).await;
        } else {
            error!(
                "Tx {} reverted in block {:?} ({:?})",
                self.record.id, receipt.block_number, receipt.transaction_hash
            );
            self.finish(
                TxStatus::Failed,
                Some("transaction reverted".to_string()),
                Some(receipt),
            )
            .await;
        }
    }

    /// Persist the terminal status, free the nonce and wake waiters
    async fn finish(
        &mut self,
        status: TxStatus,
        message: Option<String>,
        receipt: Option<TransactionReceipt>,
    ) {
        let id = self.record.id.clone();

        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match self
                .manager
                .store
                .update_tx_status(&id, status, message.clone(), receipt.clone())
                .await
            {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < TERMINAL_WRITE_ATTEMPTS => {
                    warn!("Failed to store status of tx {} (attempt {}): {}", id, attempt, e);
                    if !self.pause(self.manager.poll_interval).await {
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to store status {} of tx {}: {}", status, id, e);
                    break;
                }
            }
        }

        if let Some(nonce) = self.record.nonce {
            self.manager.nonces.release(self.record.chain_id, nonce).await;
        }

        let latency = (Utc::now() - self.record.created_at).num_milliseconds() as f64 / 1000.0;
        crate::metrics::record_tx_completed(self.record.chain_id, status.as_str(), latency);

        self.record.status = status;
        self.manager.notify_completed(&id);
    }

    /// Sleep unless cancelled; false when cancelled
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
