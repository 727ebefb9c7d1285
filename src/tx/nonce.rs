//! Nonce allocation for concurrently managed transactions
//!
//! Handles:
//! - Handing out distinct nonces to records submitted at the same time
//! - Re-using nonces of records that gave up
//! - Reserving nonces of records recovered after a restart

use crate::chain::ChainClient;
use crate::error::RelayerResult;

use dashmap::DashMap;
use ethers::types::Address;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-chain nonce state
#[derive(Default)]
struct ChainNonceState {
    /// Nonces owned by records that are still pending; only `release` frees one
    held: BTreeSet<u64>,
}

/// Manages nonces across multiple chains
pub struct NonceManager {
    /// Wallet address
    wallet_address: Address,
    /// Per-chain nonce state
    chain_state: DashMap<u64, Arc<Mutex<ChainNonceState>>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new(wallet_address: Address) -> Self {
        Self {
            wallet_address,
            chain_state: DashMap::new(),
        }
    }

    fn state(&self, chain_id: u64) -> Arc<Mutex<ChainNonceState>> {
        self.chain_state
            .entry(chain_id)
            .or_insert_with(|| Arc::new(Mutex::new(ChainNonceState::default())))
            .clone()
    }

    /// Allocate the lowest free nonce at or above the account's pending nonce
    pub async fn acquire(&self, chain_id: u64, client: &dyn ChainClient) -> RelayerResult<u64> {
        let state = self.state(chain_id);
        let mut state = state.lock().await;

        let pending = client.pending_nonce(self.wallet_address).await?;

        let mut nonce = pending;
        while state.held.contains(&nonce) {
            nonce += 1;
        }
        state.held.insert(nonce);

        debug!(
            "Allocated nonce {} for chain {} (pending {})",
            nonce, chain_id, pending
        );
        Ok(nonce)
    }

    /// Mark a nonce as owned without consulting the chain
    pub async fn reserve(&self, chain_id: u64, nonce: u64) {
        let state = self.state(chain_id);
        state.lock().await.held.insert(nonce);
        debug!("Reserved nonce {} for chain {}", nonce, chain_id);
    }

    /// Release a nonce once its record is terminal
    pub async fn release(&self, chain_id: u64, nonce: u64) {
        let state = self.state(chain_id);
        state.lock().await.held.remove(&nonce);
        debug!("Released nonce {} for chain {}", nonce, chain_id);
    }

    /// Nonces currently held on a chain
    pub async fn held(&self, chain_id: u64) -> Vec<u64> {
        let state = self.state(chain_id);
        let held = state.lock().await.held.iter().copied().collect();
        held
    }
}
