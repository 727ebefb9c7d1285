//! Transaction store
//!
//! Durable record of every transaction handed to the manager:
//! - `TxStore` trait consumed by the lifecycle manager
//! - `BlockStore` trait holding the relay's per-contract listener checkpoint
//! - In-memory and PostgreSQL implementations of both

mod memory;
mod postgres;

pub use memory::InMemoryTxStore;
pub use postgres::PgTxStore;

use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
use mockall::automock;

/// Lifecycle status of a transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Succeeded,
    Failed,
    Errored,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    /// Status only moves forward: `Pending` to any terminal status, nothing out of a
    /// terminal one.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        *self == TxStatus::Pending && next != TxStatus::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Succeeded => "succeeded",
            TxStatus::Failed => "failed",
            TxStatus::Errored => "errored",
        }
    }

    pub fn all() -> [TxStatus; 4] {
        [
            TxStatus::Pending,
            TxStatus::Succeeded,
            TxStatus::Failed,
            TxStatus::Errored,
        ]
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "succeeded" => Ok(TxStatus::Succeeded),
            "failed" => Ok(TxStatus::Failed),
            "errored" => Ok(TxStatus::Errored),
            other => Err(RelayerError::Internal(format!(
                "unknown transaction status: {}",
                other
            ))),
        }
    }
}

/// A signed, broadcast-ready transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub hash: H256,
    /// RLP-encoded signed transaction
    pub raw: Bytes,
    pub nonce: u64,
    pub gas_price: U256,
}

/// Transaction record tracked by the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub chain_id: u64,
    pub to: Address,
    pub data: Bytes,
    pub gas_limit: u64,
    /// Assigned on first broadcast, fixed afterwards
    pub nonce: Option<u64>,
    /// Most recently broadcast transaction
    pub signed_tx: Option<SignedTx>,
    pub receipt: Option<TransactionReceipt>,
    pub status: TxStatus,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TxRecord {
    /// Create a new pending record
    pub fn new(id: String, chain_id: u64, to: Address, data: Bytes, gas_limit: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            chain_id,
            to,
            data,
            gas_limit,
            nonce: None,
            signed_tx: None,
            receipt: None,
            status: TxStatus::Pending,
            status_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_broadcast(&self) -> bool {
        self.signed_tx.is_some()
    }

    /// Apply a new broadcast, enforcing nonce stability
    pub(crate) fn apply_signed_tx(&mut self, signed_tx: SignedTx) -> RelayerResult<()> {
        match self.nonce {
            Some(recorded) if recorded != signed_tx.nonce => {
                return Err(RelayerError::NonceMismatch {
                    tx_id: self.id.clone(),
                    recorded,
                    got: signed_tx.nonce,
                });
            }
            _ => {}
        }

        self.nonce = Some(signed_tx.nonce);
        self.signed_tx = Some(signed_tx);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a status change, enforcing forward-only transitions
    pub(crate) fn apply_status(
        &mut self,
        status: TxStatus,
        message: Option<String>,
        receipt: Option<TransactionReceipt>,
    ) -> RelayerResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(RelayerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        self.status = status;
        self.status_message = message;
        self.receipt = receipt;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Filter for listing transactions; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListTxsFilter {
    pub status: Option<TxStatus>,
}

impl ListTxsFilter {
    pub fn status(status: TxStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    pub fn matches(&self, record: &TxRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
    }
}

/// Persistence contract consumed by the transaction manager.
///
/// Implementations must be safe for concurrent use and make status/receipt updates
/// atomic per record.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Insert a new record. Fails if the ID is already present.
    async fn store_tx(&self, tx: TxRecord) -> RelayerResult<()>;

    /// Replace the most recently broadcast transaction of a record.
    async fn update_raw_tx(&self, id: &str, signed_tx: SignedTx) -> RelayerResult<()>;

    /// Move a record to a new status, attaching the receipt if any.
    async fn update_tx_status(
        &self,
        id: &str,
        status: TxStatus,
        message: Option<String>,
        receipt: Option<TransactionReceipt>,
    ) -> RelayerResult<()>;

    /// Fetch a record; `None` when absent.
    async fn get_tx(&self, id: &str) -> RelayerResult<Option<TxRecord>>;

    /// List records matching the filter.
    async fn list_txs(&self, filter: ListTxsFilter) -> RelayerResult<Vec<TxRecord>>;

    /// Health check
    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}

/// Last handled block per chain and contract
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Next block to scan for the contract; `None` when nothing was handled yet.
    async fn get_handled_block(&self, chain_id: u64, contract: Address)
        -> RelayerResult<Option<u64>>;

    /// Record a handled block. The stored value never moves backwards.
    async fn set_handled_block(
        &self,
        chain_id: u64,
        contract: Address,
        block_number: u64,
    ) -> RelayerResult<()>;
}
