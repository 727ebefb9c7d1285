//! SuperBridge relay
//!
//! Watches the `Msg` event of the bridge contract on every configured chain and
//! submits the matching `release` call on the destination chain through the
//! transaction manager.

pub(crate) mod codec;
mod relay;

pub use codec::BridgeCodec;
pub use relay::{BridgeEndpoint, BridgeRelay};

use ethers::types::{Address, Bytes, H256};
use serde::Serialize;

/// A decoded `Msg` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeMessage {
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub destination_contract: Address,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub tx_hash: Option<H256>,
}
