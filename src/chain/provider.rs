//! Chain provider with multi-RPC support and automatic failover

use super::{ChainClient, EventSource};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::store::SignedTx;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Last known block number
    last_block: AtomicU64,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            last_block: AtomicU64::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: impl ToString) -> RelayerError {
        RelayerError::ChainConnection {
            chain_id: self.config.chain_id,
            message: message.to_string(),
        }
    }

    /// The node already holds this exact transaction in its pool
    fn is_already_known(message: &str) -> bool {
        let lowered = message.to_lowercase();
        lowered.contains("already known") || lowered.contains("already imported")
    }

    /// Map a node rejection of a raw transaction to a typed error
    fn classify_send_error(&self, message: String) -> RelayerError {
        let chain_id = self.config.chain_id;
        let lowered = message.to_lowercase();

        if lowered.contains("nonce too low") {
            RelayerError::NonceTooLow { chain_id, message }
        } else if lowered.contains("replacement transaction underpriced") {
            RelayerError::ReplacementUnderpriced { chain_id, message }
        } else if lowered.contains("insufficient funds") {
            RelayerError::Signer {
                chain_id,
                message: format!("Insufficient funds: {}", message),
            }
        } else {
            RelayerError::ChainConnection { chain_id, message }
        }
    }

    /// Last block number observed through this provider
    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Get chain name
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    async fn pending_nonce(&self, address: Address) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(nonce) => return Ok(nonce.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get nonce from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get nonce"))
    }

    async fn suggest_gas_price(&self) -> RelayerResult<U256> {
        self.http()
            .get_gas_price()
            .await
            .map_err(|e| RelayerError::GasPrice {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })
    }

    async fn send_transaction(&self, tx: &SignedTx) -> RelayerResult<H256> {
        for _ in 0..self.http_providers.len() {
            match self.http().send_raw_transaction(tx.raw.clone()).await {
                Ok(pending) => return Ok(pending.tx_hash()),
                Err(e) => {
                    let message = e.to_string();
                    if Self::is_already_known(&message) {
                        debug!(
                            "Tx {:?} already in the pool of chain {}",
                            tx.hash, self.config.chain_id
                        );
                        return Ok(tx.hash);
                    }

                    match self.classify_send_error(message) {
                        RelayerError::ChainConnection { message, .. } => {
                            warn!(
                                "Failed to send tx {:?} to chain {}: {}",
                                tx.hash, self.config.chain_id, message
                            );
                            self.failover();
                        }
                        rejected => return Err(rejected),
                    }
                }
            }
        }

        Err(self.connection_error("All providers failed to send transaction"))
    }

    async fn transaction_receipt(&self, hash: H256) -> RelayerResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Failed to get receipt {:?} from chain {}: {}",
                        hash, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get receipt"))
    }
}

#[async_trait]
impl EventSource for ChainProvider {
    async fn block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let block_num = block.as_u64();
                    self.last_block.store(block_num, Ordering::Relaxed);
                    return Ok(block_num);
                }
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    async fn logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!(
                        "Failed to get logs from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ChainProvider {
        ChainProvider::new(ChainConfig {
            chain_id: 1337,
            name: "local".to_string(),
            rpc_urls: vec![
                "http://127.0.0.1:8545".to_string(),
                "http://127.0.0.1:8546".to_string(),
            ],
            bridge_contract: format!("{:?}", Address::repeat_byte(0x11)),
            deployment_block: 0,
            log_poll_interval_ms: 2000,
            enabled: true,
        })
        .unwrap()
    }

    #[test]
    fn test_no_valid_urls_rejected() {
        let result = ChainProvider::new(ChainConfig {
            chain_id: 5,
            name: "broken".to_string(),
            rpc_urls: vec!["not a url".to_string()],
            bridge_contract: String::new(),
            deployment_block: 0,
            log_poll_interval_ms: 2000,
            enabled: true,
        });
        assert!(matches!(
            result,
            Err(RelayerError::ChainConnection { chain_id: 5, .. })
        ));
    }

    #[test]
    fn test_failover_rotates_providers() {
        let provider = provider();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_send_error_classification() {
        let provider = provider();

        assert!(matches!(
            provider.classify_send_error("nonce too low".to_string()),
            RelayerError::NonceTooLow { .. }
        ));
        assert!(matches!(
            provider.classify_send_error("Replacement transaction underpriced".to_string()),
            RelayerError::ReplacementUnderpriced { .. }
        ));
        assert!(matches!(
            provider.classify_send_error("insufficient funds for gas * price + value".to_string()),
            RelayerError::Signer { .. }
        ));
        assert!(matches!(
            provider.classify_send_error("connection reset".to_string()),
            RelayerError::ChainConnection { .. }
        ));
        assert!(matches!(
            provider.classify_send_error("already known".to_string()),
            RelayerError::ChainConnection { .. }
        ));
        assert!(ChainProvider::is_already_known("Already known"));
        assert!(!ChainProvider::is_already_known("nonce too low"));
    }

    #[tokio::test]
    async fn test_send_and_receipt_try_every_provider() {
        let provider = ChainProvider::new(ChainConfig {
            chain_id: 1337,
            name: "unreachable".to_string(),
            rpc_urls: vec![
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:2".to_string(),
            ],
            bridge_contract: format!("{:?}", Address::repeat_byte(0x11)),
            deployment_block: 0,
            log_poll_interval_ms: 2000,
            enabled: true,
        })
        .unwrap();

        let signed = SignedTx {
            hash: H256::repeat_byte(0x01),
            raw: Bytes::from(vec![0xf8]),
            nonce: 0,
            gas_price: U256::from(1),
        };
        match provider.send_transaction(&signed).await {
            Err(RelayerError::ChainConnection { message, .. }) => {
                assert_eq!(message, "All providers failed to send transaction")
            }
            other => panic!("unexpected send result: {:?}", other),
        }

        match provider.transaction_receipt(signed.hash).await {
            Err(RelayerError::ChainConnection { message, .. }) => {
                assert_eq!(message, "All providers failed to get receipt")
            }
            other => panic!("unexpected receipt result: {:?}", other),
        }
    }
}
