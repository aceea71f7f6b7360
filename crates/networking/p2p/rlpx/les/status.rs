use bytes::{BufMut, Bytes};
use etherlight_core::{types::BlockHash, H256, U256};
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::{
    error::RLPxError,
    message::RLPxMessage,
    utils::{snappy_compress, snappy_decompress},
};

use super::LES_PROTOCOL_VERSION;

/// One row of the Maximum Request Cost table a server announces in its
/// Status: `[messageCode, baseCost, requestCost]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CostEntry {
    pub msg_code: u8,
    pub base_cost: u64,
    pub req_cost: u64,
}

impl RLPEncode for CostEntry {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.msg_code)
            .encode_field(&self.base_cost)
            .encode_field(&self.req_cost)
            .finish()
    }
}

impl RLPDecode for CostEntry {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (msg_code, decoder) = decoder.decode_field("msg_code")?;
        let (base_cost, decoder) = decoder.decode_field("base_cost")?;
        let (req_cost, decoder) = decoder.decode_field("req_cost")?;
        let entry = CostEntry {
            msg_code,
            base_cost,
            req_cost,
        };
        Ok((entry, decoder.finish()?))
    }
}

/// The LES handshake message, exchanged exactly once per session right after
/// the transport activates. Unlike eth's Status this is a key/value list so
/// either side can omit or extend fields.
#[derive(Debug, Clone)]
pub(crate) struct StatusMessage {
    pub protocol_version: u64,
    pub network_id: u64,
    pub head_td: U256,
    pub head_hash: BlockHash,
    pub head_number: u64,
    pub genesis_hash: BlockHash,
    /// Which kind of Announce messages we want (0 none, 1 simple, 2 signed).
    pub announce_type: Option<u64>,
    pub serve_headers: bool,
    pub serve_chain_since: Option<u64>,
    pub serve_state_since: Option<u64>,
    pub tx_relay: bool,
    /// flowControl/BL
    pub flow_buffer_limit: Option<u64>,
    /// flowControl/MRR
    pub flow_recharge_rate: Option<u64>,
    /// flowControl/MRC
    pub flow_cost_table: Option<Vec<CostEntry>>,
}

impl StatusMessage {
    /// The Status a pure client advertises: chain coordinates plus the
    /// announce policy, no serving flags.
    pub fn client(
        network_id: u64,
        head_td: U256,
        head_hash: H256,
        head_number: u64,
        genesis_hash: H256,
    ) -> Self {
        Self {
            protocol_version: LES_PROTOCOL_VERSION,
            network_id,
            head_td,
            head_hash,
            head_number,
            genesis_hash,
            announce_type: Some(1),
            serve_headers: false,
            serve_chain_since: None,
            serve_state_since: None,
            tx_relay: false,
            flow_buffer_limit: None,
            flow_recharge_rate: None,
            flow_cost_table: None,
        }
    }

    /// A mismatched network, genesis or protocol version is fatal for the
    /// session.
    pub fn ensure_compatible(&self, ours: &StatusMessage) -> Result<(), RLPxError> {
        if self.protocol_version != ours.protocol_version {
            return Err(RLPxError::StatusMismatch(format!(
                "protocol version {} (expected {})",
                self.protocol_version, ours.protocol_version
            )));
        }
        if self.network_id != ours.network_id {
            return Err(RLPxError::StatusMismatch(format!(
                "network id {} (expected {})",
                self.network_id, ours.network_id
            )));
        }
        if self.genesis_hash != ours.genesis_hash {
            return Err(RLPxError::StatusMismatch(format!(
                "genesis hash {:#x} (expected {:#x})",
                self.genesis_hash, ours.genesis_hash
            )));
        }
        Ok(())
    }
}

fn pair<V: RLPEncode>(key: &str, value: &V) -> (Bytes, Bytes) {
    (
        Bytes::copy_from_slice(key.as_bytes()),
        value.encode_to_vec().into(),
    )
}

impl RLPxMessage for StatusMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut pairs: Vec<(Bytes, Bytes)> = vec![
            pair("protocolVersion", &self.protocol_version),
            pair("networkId", &self.network_id),
            pair("headTd", &self.head_td),
            pair("headHash", &self.head_hash),
            pair("headNum", &self.head_number),
            pair("genesisHash", &self.genesis_hash),
        ];
        if let Some(announce_type) = self.announce_type {
            pairs.push(pair("announceType", &announce_type));
        }
        if self.serve_headers {
            pairs.push(pair("serveHeaders", &""));
        }
        if let Some(since) = self.serve_chain_since {
            pairs.push(pair("serveChainSince", &since));
        }
        if let Some(since) = self.serve_state_since {
            pairs.push(pair("serveStateSince", &since));
        }
        if self.tx_relay {
            pairs.push(pair("txRelay", &""));
        }
        if let Some(limit) = self.flow_buffer_limit {
            pairs.push(pair("flowControl/BL", &limit));
        }
        if let Some(rate) = self.flow_recharge_rate {
            pairs.push(pair("flowControl/MRR", &rate));
        }
        if let Some(costs) = &self.flow_cost_table {
            pairs.push(pair("flowControl/MRC", costs));
        }

        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_key_value_list(&pairs)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let mut decoder = Decoder::new(&decompressed_data)?;

        let mut protocol_version = None;
        let mut network_id = None;
        let mut head_td = None;
        let mut head_hash = None;
        let mut head_number = None;
        let mut genesis_hash = None;
        let mut announce_type = None;
        let mut serve_headers = false;
        let mut serve_chain_since = None;
        let mut serve_state_since = None;
        let mut tx_relay = false;
        let mut flow_buffer_limit = None;
        let mut flow_recharge_rate = None;
        let mut flow_cost_table = None;

        while decoder.has_remaining() {
            let (encoded_pair, rest) = decoder.get_encoded_item()?;
            decoder = rest;

            let pair_decoder = Decoder::new(&encoded_pair)?;
            let (key, pair_decoder): (String, _) = pair_decoder.decode_field("key")?;
            match key.as_str() {
                "protocolVersion" => {
                    let (value, _) = pair_decoder.decode_field("protocolVersion")?;
                    protocol_version = Some(value);
                }
                "networkId" => {
                    let (value, _) = pair_decoder.decode_field("networkId")?;
                    network_id = Some(value);
                }
                "headTd" => {
                    let (value, _) = pair_decoder.decode_field("headTd")?;
                    head_td = Some(value);
                }
                "headHash" => {
                    let (value, _) = pair_decoder.decode_field("headHash")?;
                    head_hash = Some(value);
                }
                "headNum" => {
                    let (value, _) = pair_decoder.decode_field("headNum")?;
                    head_number = Some(value);
                }
                "genesisHash" => {
                    let (value, _) = pair_decoder.decode_field("genesisHash")?;
                    genesis_hash = Some(value);
                }
                "announceType" => {
                    let (value, _) = pair_decoder.decode_field("announceType")?;
                    announce_type = Some(value);
                }
                "serveHeaders" => serve_headers = true,
                "serveChainSince" => {
                    let (value, _) = pair_decoder.decode_field("serveChainSince")?;
                    serve_chain_since = Some(value);
                }
                "serveStateSince" => {
                    let (value, _) = pair_decoder.decode_field("serveStateSince")?;
                    serve_state_since = Some(value);
                }
                "txRelay" => tx_relay = true,
                "flowControl/BL" => {
                    let (value, _) = pair_decoder.decode_field("flowControl/BL")?;
                    flow_buffer_limit = Some(value);
                }
                "flowControl/MRR" => {
                    let (value, _) = pair_decoder.decode_field("flowControl/MRR")?;
                    flow_recharge_rate = Some(value);
                }
                "flowControl/MRC" => {
                    let (value, _) = pair_decoder.decode_field("flowControl/MRC")?;
                    flow_cost_table = Some(value);
                }
                // Implementations must ignore unknown keys
                _ => {}
            }
        }

        let missing = |field: &str| RLPDecodeError::Custom(format!("Status missing '{field}'"));
        Ok(Self {
            protocol_version: protocol_version.ok_or_else(|| missing("protocolVersion"))?,
            network_id: network_id.ok_or_else(|| missing("networkId"))?,
            head_td: head_td.ok_or_else(|| missing("headTd"))?,
            head_hash: head_hash.ok_or_else(|| missing("headHash"))?,
            head_number: head_number.ok_or_else(|| missing("headNum"))?,
            genesis_hash: genesis_hash.ok_or_else(|| missing("genesisHash"))?,
            announce_type,
            serve_headers,
            serve_chain_since,
            serve_state_since,
            tx_relay,
            flow_buffer_limit,
            flow_recharge_rate,
            flow_cost_table,
        })
    }
}
