use bytes::BufMut;
use etherlight_rlp::error::{RLPDecodeError, RLPEncodeError};
use std::fmt::Display;

use super::les::announce::Announce;
use super::les::blocks::{BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders};
use super::les::proofs::{GetHelperTrieProofs, GetProofsV2, HelperTrieProofs, ProofsV2};
use super::les::receipts::{GetReceipts, Receipts};
use super::les::status::StatusMessage;
use super::les::transactions::{GetTxStatus, SendTx2, TxStatus};
use super::p2p::{DisconnectMessage, HelloMessage, PingMessage, PongMessage};

use etherlight_rlp::encode::RLPEncode;

pub(crate) trait RLPxMessage: Sized {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError>;

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError>;
}

// The les capability is the only subprotocol we negotiate, so its messages
// start right after the base protocol at offset 0x10.
const BASE_PROTOCOL_LENGTH: u8 = 0x10;

#[derive(Debug)]
pub(crate) enum Message {
    Hello(HelloMessage),
    Disconnect(DisconnectMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    // les/2 subprotocol
    Status(StatusMessage),
    Announce(Announce),
    GetBlockHeaders(GetBlockHeaders),
    BlockHeaders(BlockHeaders),
    GetBlockBodies(GetBlockBodies),
    BlockBodies(BlockBodies),
    GetReceipts(GetReceipts),
    Receipts(Receipts),
    GetProofsV2(GetProofsV2),
    ProofsV2(ProofsV2),
    GetHelperTrieProofs(GetHelperTrieProofs),
    HelperTrieProofs(HelperTrieProofs),
    SendTx2(SendTx2),
    GetTxStatus(GetTxStatus),
    TxStatus(TxStatus),
}

impl Message {
    /// Message code relative to the les capability offset, or the base code
    /// for the p2p messages.
    pub fn code(&self) -> u8 {
        match self {
            Message::Hello(_) => 0x00,
            Message::Disconnect(_) => 0x01,
            Message::Ping(_) => 0x02,
            Message::Pong(_) => 0x03,
            Message::Status(_) => BASE_PROTOCOL_LENGTH,
            Message::Announce(_) => BASE_PROTOCOL_LENGTH + 0x01,
            Message::GetBlockHeaders(_) => BASE_PROTOCOL_LENGTH + 0x02,
            Message::BlockHeaders(_) => BASE_PROTOCOL_LENGTH + 0x03,
            Message::GetBlockBodies(_) => BASE_PROTOCOL_LENGTH + 0x04,
            Message::BlockBodies(_) => BASE_PROTOCOL_LENGTH + 0x05,
            Message::GetReceipts(_) => BASE_PROTOCOL_LENGTH + 0x06,
            Message::Receipts(_) => BASE_PROTOCOL_LENGTH + 0x07,
            Message::GetProofsV2(_) => BASE_PROTOCOL_LENGTH + 0x0f,
            Message::ProofsV2(_) => BASE_PROTOCOL_LENGTH + 0x10,
            Message::GetHelperTrieProofs(_) => BASE_PROTOCOL_LENGTH + 0x11,
            Message::HelperTrieProofs(_) => BASE_PROTOCOL_LENGTH + 0x12,
            Message::SendTx2(_) => BASE_PROTOCOL_LENGTH + 0x13,
            Message::GetTxStatus(_) => BASE_PROTOCOL_LENGTH + 0x14,
            Message::TxStatus(_) => BASE_PROTOCOL_LENGTH + 0x15,
        }
    }

    pub fn decode(msg_id: u8, msg_data: &[u8]) -> Result<Message, RLPDecodeError> {
        match msg_id {
            0x00 => Ok(Message::Hello(HelloMessage::decode(msg_data)?)),
            0x01 => Ok(Message::Disconnect(DisconnectMessage::decode(msg_data)?)),
            0x02 => Ok(Message::Ping(PingMessage::decode(msg_data)?)),
            0x03 => Ok(Message::Pong(PongMessage::decode(msg_data)?)),
            0x10 => Ok(Message::Status(StatusMessage::decode(msg_data)?)),
            0x11 => Ok(Message::Announce(Announce::decode(msg_data)?)),
            0x12 => Ok(Message::GetBlockHeaders(GetBlockHeaders::decode(msg_data)?)),
            0x13 => Ok(Message::BlockHeaders(BlockHeaders::decode(msg_data)?)),
            0x14 => Ok(Message::GetBlockBodies(GetBlockBodies::decode(msg_data)?)),
            0x15 => Ok(Message::BlockBodies(BlockBodies::decode(msg_data)?)),
            0x16 => Ok(Message::GetReceipts(GetReceipts::decode(msg_data)?)),
            0x17 => Ok(Message::Receipts(Receipts::decode(msg_data)?)),
            0x1f => Ok(Message::GetProofsV2(GetProofsV2::decode(msg_data)?)),
            0x20 => Ok(Message::ProofsV2(ProofsV2::decode(msg_data)?)),
            0x21 => Ok(Message::GetHelperTrieProofs(GetHelperTrieProofs::decode(
                msg_data,
            )?)),
            0x22 => Ok(Message::HelperTrieProofs(HelperTrieProofs::decode(
                msg_data,
            )?)),
            0x23 => Ok(Message::SendTx2(SendTx2::decode(msg_data)?)),
            0x24 => Ok(Message::GetTxStatus(GetTxStatus::decode(msg_data)?)),
            0x25 => Ok(Message::TxStatus(TxStatus::decode(msg_data)?)),
            _ => Err(RLPDecodeError::MalformedData),
        }
    }

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        self.code().encode(buf);
        match self {
            Message::Hello(msg) => msg.encode(buf),
            Message::Disconnect(msg) => msg.encode(buf),
            Message::Ping(msg) => msg.encode(buf),
            Message::Pong(msg) => msg.encode(buf),
            Message::Status(msg) => msg.encode(buf),
            Message::Announce(msg) => msg.encode(buf),
            Message::GetBlockHeaders(msg) => msg.encode(buf),
            Message::BlockHeaders(msg) => msg.encode(buf),
            Message::GetBlockBodies(msg) => msg.encode(buf),
            Message::BlockBodies(msg) => msg.encode(buf),
            Message::GetReceipts(msg) => msg.encode(buf),
            Message::Receipts(msg) => msg.encode(buf),
            Message::GetProofsV2(msg) => msg.encode(buf),
            Message::ProofsV2(msg) => msg.encode(buf),
            Message::GetHelperTrieProofs(msg) => msg.encode(buf),
            Message::HelperTrieProofs(msg) => msg.encode(buf),
            Message::SendTx2(msg) => msg.encode(buf),
            Message::GetTxStatus(msg) => msg.encode(buf),
            Message::TxStatus(msg) => msg.encode(buf),
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Hello(_) => "p2p:Hello".fmt(f),
            Message::Disconnect(_) => "p2p:Disconnect".fmt(f),
            Message::Ping(_) => "p2p:Ping".fmt(f),
            Message::Pong(_) => "p2p:Pong".fmt(f),
            Message::Status(_) => "les:Status".fmt(f),
            Message::Announce(_) => "les:Announce".fmt(f),
            Message::GetBlockHeaders(_) => "les:GetBlockHeaders".fmt(f),
            Message::BlockHeaders(_) => "les:BlockHeaders".fmt(f),
            Message::GetBlockBodies(_) => "les:GetBlockBodies".fmt(f),
            Message::BlockBodies(_) => "les:BlockBodies".fmt(f),
            Message::GetReceipts(_) => "les:GetReceipts".fmt(f),
            Message::Receipts(_) => "les:Receipts".fmt(f),
            Message::GetProofsV2(_) => "les:GetProofsV2".fmt(f),
            Message::ProofsV2(_) => "les:ProofsV2".fmt(f),
            Message::GetHelperTrieProofs(_) => "les:GetHelperTrieProofs".fmt(f),
            Message::HelperTrieProofs(_) => "les:HelperTrieProofs".fmt(f),
            Message::SendTx2(_) => "les:SendTxV2".fmt(f),
            Message::GetTxStatus(_) => "les:GetTxStatus".fmt(f),
            Message::TxStatus(_) => "les:TxStatus".fmt(f),
        }
    }
}
