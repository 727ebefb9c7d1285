//! In-memory transaction and checkpoint store

use super::{BlockStore, ListTxsFilter, SignedTx, TxRecord, TxStatus, TxStore};
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Transaction store backed by a single locked map
#[derive(Default)]
pub struct InMemoryTxStore {
    txs: Mutex<HashMap<String, TxRecord>>,
    blocks: Mutex<HashMap<(u64, Address), u64>>,
}

impl InMemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxStore for InMemoryTxStore {
    async fn store_tx(&self, tx: TxRecord) -> RelayerResult<()> {
        let mut txs = self.txs.lock().await;
        if txs.contains_key(&tx.id) {
            return Err(RelayerError::TransactionExists { tx_id: tx.id });
        }

        txs.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn update_raw_tx(&self, id: &str, signed_tx: SignedTx) -> RelayerResult<()> {
        let mut txs = self.txs.lock().await;
        let record = txs
            .get_mut(id)
            .ok_or_else(|| RelayerError::TransactionNotFound {
                tx_id: id.to_string(),
            })?;

        record.apply_signed_tx(signed_tx)
    }

    async fn update_tx_status(
        &self,
        id: &str,
        status: TxStatus,
        message: Option<String>,
        receipt: Option<TransactionReceipt>,
    ) -> RelayerResult<()> {
        let mut txs = self.txs.lock().await;
        let record = txs
            .get_mut(id)
            .ok_or_else(|| RelayerError::TransactionNotFound {
                tx_id: id.to_string(),
            })?;

        record.apply_status(status, message, receipt)
    }

    async fn get_tx(&self, id: &str) -> RelayerResult<Option<TxRecord>> {
        Ok(self.txs.lock().await.get(id).cloned())
    }

    async fn list_txs(&self, filter: ListTxsFilter) -> RelayerResult<Vec<TxRecord>> {
        let mut records: Vec<_> = self
            .txs
            .lock()
            .await
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();

        records.sort_by_key(|tx| tx.created_at);
        Ok(records)
    }
}

#[async_trait]
impl BlockStore for InMemoryTxStore {
    async fn get_handled_block(
        &self,
        chain_id: u64,
        contract: Address,
    ) -> RelayerResult<Option<u64>> {
        Ok(self.blocks.lock().await.get(&(chain_id, contract)).copied())
    }

    async fn set_handled_block(
        &self,
        chain_id: u64,
        contract: Address,
        block_number: u64,
    ) -> RelayerResult<()> {
        let mut blocks = self.blocks.lock().await;
        let entry = blocks.entry((chain_id, contract)).or_insert(block_number);
        *entry = (*entry).max(block_number);
        Ok(())
    }
}
