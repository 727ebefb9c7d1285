//! Chain module - RPC access and bridge event polling
//!
//! This module provides:
//! - `ChainClient`, the capability the transaction manager needs from a network
//! - `EventSource`, the capability the bridge relay needs to read logs
//! - Multi-RPC provider implementing both, with automatic failover
//! - Windowed log listener for the bridge `Msg` event

pub mod listener;
pub mod provider;

pub use listener::ChainListener;
pub use provider::ChainProvider;

use crate::error::RelayerResult;
use crate::store::SignedTx;

use async_trait::async_trait;
use ethers::types::{Address, Filter, Log, TransactionReceipt, H256, U256};

#[cfg(test)]
use mockall::automock;

/// Per-network RPC capability used by the transaction manager
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Nonce of the account including pool transactions
    async fn pending_nonce(&self, address: Address) -> RelayerResult<u64>;

    /// Gas price currently suggested by the node
    async fn suggest_gas_price(&self) -> RelayerResult<U256>;

    /// Broadcast a signed transaction, returning its hash
    async fn send_transaction(&self, tx: &SignedTx) -> RelayerResult<H256>;

    /// Receipt for a hash; `None` while the transaction is not mined
    async fn transaction_receipt(&self, hash: H256) -> RelayerResult<Option<TransactionReceipt>>;
}

/// Log access used by the bridge relay
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn block_number(&self) -> RelayerResult<u64>;

    async fn logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>>;
}
