//! SuperBridge contract ABI: `Msg` event decoding and `release` call encoding

use super::BridgeMessage;
use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{parse_abi, Event, Function, RawLog, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};

const BRIDGE_ABI: &[&str] = &[
    "event Msg(uint256 indexed destinationChainId, address indexed destinationContract, bytes data)",
    "function release(address addr, bytes data)",
];

/// Encoder/decoder for the bridge contract
#[derive(Debug, Clone)]
pub struct BridgeCodec {
    msg_event: Event,
    release_fn: Function,
}

impl BridgeCodec {
    pub fn new() -> RelayerResult<Self> {
        let abi = parse_abi(BRIDGE_ABI)
            .map_err(|e| RelayerError::Config(format!("Invalid bridge ABI: {}", e)))?;

        let msg_event = abi
            .event("Msg")
            .map_err(|e| RelayerError::Config(format!("Msg event missing from ABI: {}", e)))?
            .clone();
        let release_fn = abi
            .function("release")
            .map_err(|e| RelayerError::Config(format!("release function missing from ABI: {}", e)))?
            .clone();

        Ok(Self {
            msg_event,
            release_fn,
        })
    }

    /// topic0 of the `Msg` event
    pub fn msg_topic(&self) -> H256 {
        self.msg_event.signature()
    }

    /// Decode a `Msg` log emitted by the bridge on `source_chain_id`
    pub fn decode_msg(&self, source_chain_id: u64, log: &Log) -> RelayerResult<BridgeMessage> {
        match log.topics.first() {
            None => {
                return Err(RelayerError::EventParsing(
                    "anonymous events are not supported".to_string(),
                ))
            }
            Some(topic) if *topic != self.msg_topic() => {
                return Err(RelayerError::EventParsing(
                    "event signature mismatch".to_string(),
                ))
            }
            _ => {}
        }

        let parsed = self
            .msg_event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .map_err(|e| RelayerError::EventParsing(format!("Failed to decode Msg: {}", e)))?;

        let mut destination_chain_id = None;
        let mut destination_contract = None;
        let mut data = None;
        for param in parsed.params {
            match (param.name.as_str(), param.value) {
                ("destinationChainId", Token::Uint(value)) => destination_chain_id = Some(value),
                ("destinationContract", Token::Address(value)) => {
                    destination_contract = Some(value)
                }
                ("data", Token::Bytes(value)) => data = Some(value),
                (name, _) => {
                    return Err(RelayerError::EventParsing(format!(
                        "unexpected Msg parameter {}",
                        name
                    )))
                }
            }
        }

        let destination_chain_id = destination_chain_id
            .ok_or_else(|| RelayerError::EventParsing("missing destinationChainId".to_string()))?;
        if destination_chain_id > U256::from(u64::MAX) {
            return Err(RelayerError::EventParsing(format!(
                "destination chain id {} out of range",
                destination_chain_id
            )));
        }

        Ok(BridgeMessage {
            source_chain_id,
            destination_chain_id: destination_chain_id.as_u64(),
            destination_contract: destination_contract.ok_or_else(|| {
                RelayerError::EventParsing("missing destinationContract".to_string())
            })?,
            data: Bytes::from(
                data.ok_or_else(|| RelayerError::EventParsing("missing data".to_string()))?,
            ),
            block_number: log.block_number.map(|b| b.as_u64()),
            tx_hash: log.transaction_hash,
        })
    }

    /// Calldata for `release(addr, data)`
    pub fn encode_release(&self, addr: Address, data: &Bytes) -> RelayerResult<Bytes> {
        self.release_fn
            .encode_input(&[Token::Address(addr), Token::Bytes(data.to_vec())])
            .map(Bytes::from)
            .map_err(|e| RelayerError::Encoding(format!("Failed to encode release: {}", e)))
    }
}
