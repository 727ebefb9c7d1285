//! Signer providers
//!
//! The transaction manager never holds keys itself; it asks a `SignerProvider` for a
//! chain-bound wallet whenever it has to sign.

use crate::error::{RelayerError, RelayerResult};

use ethers::signers::{LocalWallet, Signer};
use std::sync::Arc;

/// Chain ID to signing wallet
pub type SignerProvider = Arc<dyn Fn(u64) -> RelayerResult<LocalWallet> + Send + Sync>;

/// Provider signing for every chain with the same hex-encoded private key
pub fn from_private_key(key: &str) -> RelayerResult<SignerProvider> {
    let wallet = key
        .trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| RelayerError::Signer {
            chain_id: 0,
            message: format!("Invalid private key: {}", e),
        })?;

    Ok(Arc::new(move |chain_id| Ok(wallet.clone().with_chain_id(chain_id))))
}

/// Provider built from the private key stored in environment variable `var`
pub fn from_env(var: &str) -> RelayerResult<SignerProvider> {
    let key = std::env::var(var).map_err(|_| RelayerError::Signer {
        chain_id: 0,
        message: format!("No wallet configured. Set {}", var),
    })?;

    from_private_key(&key)
}

/// Provider that only signs for the listed chains
pub fn restricted(inner: SignerProvider, chain_ids: Vec<u64>) -> SignerProvider {
    Arc::new(move |chain_id| {
        if chain_ids.contains(&chain_id) {
            inner(chain_id)
        } else {
            Err(RelayerError::Signer {
                chain_id,
                message: "no signer configured for chain".to_string(),
            })
        }
    })
}
