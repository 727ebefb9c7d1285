//! Error types for the SuperBridge relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Signer error for chain {chain_id}: {message}")]
    Signer { chain_id: u64, message: String },

    #[error("Nonce too low on chain {chain_id}: {message}")]
    NonceTooLow { chain_id: u64, message: String },

    #[error("Replacement transaction underpriced on chain {chain_id}: {message}")]
    ReplacementUnderpriced { chain_id: u64, message: String },

    #[error("Gas price error for chain {chain_id}: {message}")]
    GasPrice { chain_id: u64, message: String },

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Transaction {tx_id} already exists")]
    TransactionExists { tx_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Nonce mismatch for tx {tx_id}: recorded {recorded}, got {got}")]
    NonceMismatch {
        tx_id: String,
        recorded: u64,
        got: u64,
    },

    #[error("tx not confirmed after several attempts")]
    NotConfirmed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transaction manager is stopped")]
    ManagerStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::GasPrice { .. }
                | RelayerError::NonceTooLow { .. }
                | RelayerError::ReplacementUnderpriced { .. }
                | RelayerError::Database(_)
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
