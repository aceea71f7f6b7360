use std::time::{Duration, SystemTime, UNIX_EPOCH};

use etherlight_core::{H256, H512};
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::types::{Endpoint, Node};

/// Node Discovery v4 packet layout:
/// `hash(32) || signature(65) || packet-type(1) || RLP payload`.
const HASH_SIZE: usize = 32;
const SIGNATURE_SIZE: usize = 65;
const HEADER_SIZE: usize = HASH_SIZE + SIGNATURE_SIZE;

#[derive(Debug)]
pub(crate) enum PacketDecodeErr {
    #[allow(unused)]
    RLPDecodeError(RLPDecodeError),
    InvalidHash,
    InvalidSignature,
    InvalidSize,
    UnknownPacket,
}

impl From<RLPDecodeError> for PacketDecodeErr {
    fn from(err: RLPDecodeError) -> Self {
        PacketDecodeErr::RLPDecodeError(err)
    }
}

#[derive(Debug)]
pub(crate) struct Packet {
    hash: H256,
    node_id: H512,
    message: Message,
}

impl Packet {
    /// Verifies the hash and signature, recovering the sender's node id.
    /// Packets failing either check are dropped by the caller.
    pub fn decode(encoded_packet: &[u8]) -> Result<Packet, PacketDecodeErr> {
        if encoded_packet.len() < HEADER_SIZE + 1 {
            return Err(PacketDecodeErr::InvalidSize);
        }

        let hash = H256::from_slice(&encoded_packet[..HASH_SIZE]);
        let signature_bytes = &encoded_packet[HASH_SIZE..HEADER_SIZE];
        let signed_payload = &encoded_packet[HASH_SIZE..];
        let message_bytes = &encoded_packet[HEADER_SIZE..];

        if H256(Keccak256::digest(signed_payload).into()) != hash {
            return Err(PacketDecodeErr::InvalidHash);
        }

        let digest = Keccak256::digest(message_bytes);
        let signature = Signature::from_slice(&signature_bytes[..64])
            .map_err(|_| PacketDecodeErr::InvalidSignature)?;
        let rid = RecoveryId::from_byte(signature_bytes[64])
            .ok_or(PacketDecodeErr::InvalidSignature)?;
        let peer_pk = VerifyingKey::recover_from_prehash(&digest, &signature, rid)
            .map_err(|_| PacketDecodeErr::InvalidSignature)?;
        let encoded = peer_pk.to_encoded_point(false);
        let node_id = H512::from_slice(&encoded.as_bytes()[1..]);

        let message = Message::decode_with_type(message_bytes[0], &message_bytes[1..])?;

        Ok(Packet {
            hash,
            node_id,
            message,
        })
    }

    pub fn get_hash(&self) -> H256 {
        self.hash
    }

    pub fn get_message(&self) -> &Message {
        &self.message
    }

    pub fn get_node_id(&self) -> H512 {
        self.node_id
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    FindNode(FindNodeMessage),
    Neighbors(NeighborsMessage),
}

impl Message {
    fn packet_type(&self) -> u8 {
        match self {
            Message::Ping(_) => 0x01,
            Message::Pong(_) => 0x02,
            Message::FindNode(_) => 0x03,
            Message::Neighbors(_) => 0x04,
        }
    }

    /// Serializes the message with the discovery v4 header:
    /// the signature covers `packet-type || payload`, the hash covers
    /// `signature || packet-type || payload`.
    pub fn encode_with_header(&self, buf: &mut Vec<u8>, signer: &SigningKey) {
        let mut data = Vec::new();
        data.push(self.packet_type());
        match self {
            Message::Ping(msg) => msg.encode(&mut data),
            Message::Pong(msg) => msg.encode(&mut data),
            Message::FindNode(msg) => msg.encode(&mut data),
            Message::Neighbors(msg) => msg.encode(&mut data),
        }

        let digest = Keccak256::digest(&data);
        let (signature, rid) = signer
            .sign_prehash_recoverable(&digest)
            .expect("failed to sign discovery packet");
        let mut signature_bytes = [0u8; SIGNATURE_SIZE];
        signature_bytes[..64].copy_from_slice(signature.to_bytes().as_slice());
        signature_bytes[64] = rid.to_byte();

        let hash: [u8; 32] = Keccak256::new()
            .chain_update(signature_bytes)
            .chain_update(&data)
            .finalize()
            .into();

        buf.extend_from_slice(&hash);
        buf.extend_from_slice(&signature_bytes);
        buf.extend_from_slice(&data);
    }

    fn decode_with_type(packet_type: u8, msg: &[u8]) -> Result<Message, PacketDecodeErr> {
        match packet_type {
            0x01 => Ok(Message::Ping(PingMessage::decode(msg)?)),
            0x02 => Ok(Message::Pong(PongMessage::decode(msg)?)),
            0x03 => Ok(Message::FindNode(FindNodeMessage::decode(msg)?)),
            0x04 => Ok(Message::Neighbors(NeighborsMessage::decode(msg)?)),
            // ENRRequest / ENRResponse and anything newer is ignored
            _ => Err(PacketDecodeErr::UnknownPacket),
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct PingMessage {
    /// The protocol version, always 4.
    pub version: u8,
    pub from: Endpoint,
    pub to: Endpoint,
    pub expiration: u64,
}

impl PingMessage {
    pub fn new(from: Endpoint, to: Endpoint, expiration: u64) -> Self {
        Self {
            version: 4,
            from,
            to,
            expiration,
        }
    }
}

impl RLPEncode for PingMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.version)
            .encode_field(&self.from)
            .encode_field(&self.to)
            .encode_field(&self.expiration)
            .finish();
    }
}

impl RLPDecode for PingMessage {
    // NOTE: extra list elements (EIP-868 enr-seq) are discarded.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (version, decoder) = decoder.decode_field("version")?;
        let (from, decoder) = decoder.decode_field("from")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let rest = decoder.finish_unchecked();
        let ping = PingMessage {
            version,
            from,
            to,
            expiration,
        };
        Ok((ping, rest))
    }
}

impl PingMessage {
    fn decode(msg: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, _) = Self::decode_unfinished(msg)?;
        Ok(decoded)
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct PongMessage {
    pub to: Endpoint,
    pub ping_hash: H256,
    pub expiration: u64,
}

impl PongMessage {
    pub fn new(to: Endpoint, ping_hash: H256, expiration: u64) -> Self {
        Self {
            to,
            ping_hash,
            expiration,
        }
    }

    fn decode(msg: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, _) = Self::decode_unfinished(msg)?;
        Ok(decoded)
    }
}

impl RLPEncode for PongMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.to)
            .encode_field(&self.ping_hash)
            .encode_field(&self.expiration)
            .finish();
    }
}

impl RLPDecode for PongMessage {
    // NOTE: extra list elements (EIP-868 enr-seq) are discarded.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (ping_hash, decoder) = decoder.decode_field("ping_hash")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let rest = decoder.finish_unchecked();
        let pong = PongMessage {
            to,
            ping_hash,
            expiration,
        };
        Ok((pong, rest))
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct FindNodeMessage {
    pub target: H512,
    pub expiration: u64,
}

impl FindNodeMessage {
    pub fn new(target: H512, expiration: u64) -> Self {
        Self { target, expiration }
    }

    fn decode(msg: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, _) = Self::decode_unfinished(msg)?;
        Ok(decoded)
    }
}

impl RLPEncode for FindNodeMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.target)
            .encode_field(&self.expiration)
            .finish();
    }
}

impl RLPDecode for FindNodeMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (target, decoder) = decoder.decode_field("target")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let rest = decoder.finish_unchecked();
        Ok((FindNodeMessage { target, expiration }, rest))
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct NeighborsMessage {
    pub nodes: Vec<Node>,
    pub expiration: u64,
}

impl NeighborsMessage {
    pub fn new(nodes: Vec<Node>, expiration: u64) -> Self {
        Self { nodes, expiration }
    }

    fn decode(msg: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, _) = Self::decode_unfinished(msg)?;
        Ok(decoded)
    }
}

impl RLPEncode for NeighborsMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nodes)
            .encode_field(&self.expiration)
            .finish();
    }
}

impl RLPDecode for NeighborsMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nodes, decoder) = decoder.decode_field("nodes")?;
        let (expiration, decoder) = decoder.decode_field("expiration")?;
        let rest = decoder.finish_unchecked();
        Ok((NeighborsMessage { nodes, expiration }, rest))
    }
}

pub(crate) fn time_now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn get_expiration(seconds: u64) -> u64 {
    (SystemTime::now() + Duration::from_secs(seconds))
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn is_expired(expiration: u64) -> bool {
    expiration < time_now_unix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::net::{IpAddr, Ipv4Addr};

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            udp_port: port,
            tcp_port: 0,
        }
    }

    #[test]
    fn ping_packet_roundtrip() {
        let signer = SigningKey::random(&mut OsRng);
        let ping = Message::Ping(PingMessage::new(
            endpoint(30303),
            endpoint(30304),
            get_expiration(20),
        ));

        let mut buf = Vec::new();
        ping.encode_with_header(&mut buf, &signer);

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(packet.get_message(), &ping);

        let expected_node_id = {
            let encoded = signer.verifying_key().to_encoded_point(false);
            H512::from_slice(&encoded.as_bytes()[1..])
        };
        assert_eq!(packet.get_node_id(), expected_node_id);
        assert_eq!(packet.get_hash(), H256::from_slice(&buf[..32]));
    }

    #[test]
    fn corrupted_packet_hash_is_rejected() {
        let signer = SigningKey::random(&mut OsRng);
        let pong = Message::Pong(PongMessage::new(
            endpoint(30303),
            H256::from_low_u64_be(1),
            get_expiration(20),
        ));

        let mut buf = Vec::new();
        pong.encode_with_header(&mut buf, &signer);
        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        assert!(matches!(
            Packet::decode(&buf),
            Err(PacketDecodeErr::InvalidHash)
        ));
    }

    #[test]
    fn neighbors_roundtrip() {
        let signer = SigningKey::random(&mut OsRng);
        let nodes = vec![Node {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            udp_port: 30303,
            tcp_port: 30303,
            node_id: H512::from_low_u64_be(7),
        }];
        let neighbors = Message::Neighbors(NeighborsMessage::new(nodes.clone(), get_expiration(20)));

        let mut buf = Vec::new();
        neighbors.encode_with_header(&mut buf, &signer);

        let packet = Packet::decode(&buf).unwrap();
        match packet.get_message() {
            Message::Neighbors(msg) => assert_eq!(msg.nodes, nodes),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn expirations() {
        assert!(!is_expired(get_expiration(20)));
        assert!(is_expired(time_now_unix().saturating_sub(1)));
    }
}
