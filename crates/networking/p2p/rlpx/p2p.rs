use bytes::BufMut;
use etherlight_core::H512;
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};
use k256::PublicKey;

use super::{
    message::RLPxMessage,
    utils::{id2pubkey, pubkey2id, snappy_compress, snappy_decompress},
};

/// A devp2p capability advertised in the Hello exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capability {
    P2p,
    Les,
}

impl Capability {
    fn as_str(&self) -> &'static str {
        match self {
            Capability::P2p => "p2p",
            Capability::Les => "les",
        }
    }
}

impl RLPEncode for Capability {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_str().encode(buf)
    }
}

impl RLPDecode for Capability {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (name, rest): (String, _) = String::decode_unfinished(rlp)?;
        match name.as_str() {
            "p2p" => Ok((Capability::P2p, rest)),
            "les" => Ok((Capability::Les, rest)),
            _ => Err(RLPDecodeError::UnexpectedString),
        }
    }
}

#[derive(Debug)]
pub(crate) struct HelloMessage {
    pub(crate) capabilities: Vec<(Capability, u8)>,
    pub(crate) node_id: PublicKey,
}

impl HelloMessage {
    pub fn new(capabilities: Vec<(Capability, u8)>, node_id: PublicKey) -> Self {
        Self {
            capabilities,
            node_id,
        }
    }
}

impl RLPxMessage for HelloMessage {
    fn encode(&self, mut buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        Encoder::new(&mut buf)
            .encode_field(&5_u8) // protocolVersion
            .encode_field(&"etherlight/0.1.0") // clientId
            .encode_field(&self.capabilities) // capabilities
            .encode_field(&0u8) // listenPort (ignored)
            .encode_field(&pubkey2id(&self.node_id)) // nodeKey
            .finish();
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // decode hello message: [protocolVersion: P, clientId: B, capabilities, listenPort: P, nodeId: B_64, ...]
        let decoder = Decoder::new(msg_data)?;
        let (protocol_version, decoder): (u64, _) = decoder.decode_field("protocolVersion")?;

        if protocol_version < 5 {
            return Err(RLPDecodeError::Custom(
                "only p2p protocol version 5 or newer is supported".to_string(),
            ));
        }

        let (_client_id, decoder): (String, _) = decoder.decode_field("clientId")?;

        // [[cap1, capVersion1], [cap2, capVersion2], ...]
        // Unknown capability names show up from full-service peers; they are
        // skipped rather than rejected.
        let (capabilities_raw, decoder): (Vec<(String, u8)>, _) =
            decoder.decode_field("capabilities")?;
        let capabilities = capabilities_raw
            .into_iter()
            .filter_map(|(name, version)| match name.as_str() {
                "p2p" => Some((Capability::P2p, version)),
                "les" => Some((Capability::Les, version)),
                _ => None,
            })
            .collect();

        // This field should be ignored
        let (_listen_port, decoder): (u16, _) = decoder.decode_field("listenPort")?;

        let (node_id, decoder): (H512, _) = decoder.decode_field("nodeId")?;

        // Implementations must ignore any additional list elements
        let _padding = decoder.finish_unchecked();

        Ok(Self::new(
            capabilities,
            id2pubkey(node_id).ok_or(RLPDecodeError::MalformedData)?,
        ))
    }
}

#[derive(Debug)]
pub(crate) struct DisconnectMessage {
    pub(crate) reason: Option<u8>,
}

impl DisconnectMessage {
    pub fn new(reason: Option<u8>) -> Self {
        Self { reason }
    }
}

impl RLPxMessage for DisconnectMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        // Disconnect msg_data is reason or none
        match self.reason {
            Some(value) => Encoder::new(&mut encoded_data)
                .encode_field(&value)
                .finish(),
            None => Vec::<u8>::new().encode(&mut encoded_data),
        }
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // decode disconnect message: [reason (optional)]
        let decompressed_data = snappy_decompress(msg_data)?;
        // The reason is seen encoded in multiple ways in the wild.
        let reason = match decompressed_data.len() {
            0 => None,
            // As a single u8
            1 => Some(decompressed_data[0]),
            // As an RLP encoded Vec<u8>
            _ => {
                let decoder = Decoder::new(&decompressed_data)?;
                let (reason, _): (Option<u8>, _) = decoder.decode_optional_field();
                reason
            }
        };

        Ok(Self::new(reason))
    }
}

#[derive(Debug)]
pub(crate) struct PingMessage {}

impl PingMessage {
    pub fn new() -> Self {
        Self {}
    }
}

impl RLPxMessage for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        // Ping msg_data is only []
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // decode ping message: data is empty list [] but it is snappy compressed
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        decoder.finish_unchecked();
        Ok(Self::new())
    }
}

#[derive(Debug)]
pub(crate) struct PongMessage {}

impl PongMessage {
    pub fn new() -> Self {
        Self {}
    }
}

impl RLPxMessage for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        // Pong msg_data is only []
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // decode pong message: data is empty list [] but it is snappy compressed
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        decoder.finish_unchecked();
        Ok(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_message_roundtrip() {
        use rand::rngs::OsRng;

        let secret_key = k256::SecretKey::random(&mut OsRng);
        let hello = HelloMessage::new(
            vec![(Capability::P2p, 5), (Capability::Les, 2)],
            secret_key.public_key(),
        );

        let mut buf = vec![];
        hello.encode(&mut buf).unwrap();
        let decoded = HelloMessage::decode(&buf).unwrap();
        assert_eq!(decoded.capabilities, hello.capabilities);
        assert_eq!(decoded.node_id, hello.node_id);
    }

    #[test]
    fn disconnect_message_roundtrip() {
        let msg = DisconnectMessage::new(Some(0x08));
        let mut buf = vec![];
        msg.encode(&mut buf).unwrap();
        let decoded = DisconnectMessage::decode(&buf).unwrap();
        assert_eq!(decoded.reason, Some(0x08));
    }
}
