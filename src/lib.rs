//! SuperBridge relayer
//!
//! Reliable multi-chain transaction management with fee bumping, plus a relay that
//! forwards SuperBridge `Msg` events to the `release` entry point on their
//! destination chain.

pub mod api;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod signer;
pub mod store;
pub mod tx;
