//! Transaction lifecycle: nonce allocation, fee bumping and confirmation tracking

pub mod gas;
mod manager;
mod nonce;
mod worker;

pub use manager::TxManager;
pub use nonce::NonceManager;
