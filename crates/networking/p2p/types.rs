use std::net::{IpAddr, SocketAddr};

use etherlight_core::{H256, H512};
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use sha3::{Digest, Keccak256};

pub type NodeId = H512;

/// The addressable identity of a peer on the discovery wire:
/// `[ip, udp_port, tcp_port]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl Endpoint {
    pub fn udp_address(&self) -> Option<SocketAddr> {
        (self.udp_port != 0).then_some(SocketAddr::new(self.ip, self.udp_port))
    }

    pub fn tcp_address(&self) -> Option<SocketAddr> {
        (self.tcp_port != 0).then_some(SocketAddr::new(self.ip, self.tcp_port))
    }
}

impl RLPEncode for Endpoint {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .finish();
    }
}

impl RLPDecode for Endpoint {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udp_port")?;
        let (tcp_port, decoder) = decoder.decode_field("tcp_port")?;
        let endpoint = Endpoint {
            ip,
            udp_port,
            tcp_port,
        };
        Ok((endpoint, decoder.finish()?))
    }
}

/// A discovered peer: endpoint plus node id. On the neighbors wire this is
/// `[ip, udp_port, tcp_port, node_id]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub node_id: NodeId,
}

impl Node {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            ip: self.ip,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
        }
    }

    pub fn udp_address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }

    pub fn tcp_address(&self) -> Option<SocketAddr> {
        (self.tcp_port != 0).then_some(SocketAddr::new(self.ip, self.tcp_port))
    }
}

impl RLPEncode for Node {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .encode_field(&self.node_id)
            .finish();
    }
}

impl RLPDecode for Node {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udp_port")?;
        let (tcp_port, decoder) = decoder.decode_field("tcp_port")?;
        let (node_id, decoder) = decoder.decode_field("node_id")?;
        let node = Node {
            ip,
            udp_port,
            tcp_port,
            node_id,
        };
        Ok((node, decoder.finish()?))
    }
}

/// Last known disposition of a persisted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Available = 0,
    Disconnected = 1,
    Error = 2,
}

impl RLPEncode for NodeState {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        (*self as u8).encode(buf)
    }
}

impl RLPDecode for NodeState {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = u8::decode_unfinished(rlp)?;
        let state = match value {
            0 => NodeState::Available,
            1 => NodeState::Disconnected,
            2 => NodeState::Error,
            other => {
                return Err(RLPDecodeError::Custom(format!(
                    "Invalid node state: {other}"
                )))
            }
        };
        Ok((state, rest))
    }
}

/// The record the manager persists for each known peer:
/// `[endpoint, state, priority]`. The save-nodes callback receives the full
/// list whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub node: Node,
    pub state: NodeState,
    pub priority: u8,
}

impl NodeConfig {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            state: NodeState::Available,
            priority: 0,
        }
    }
}

impl RLPEncode for NodeConfig {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.node)
            .encode_field(&self.state)
            .encode_field(&self.priority)
            .finish();
    }
}

impl RLPDecode for NodeConfig {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (node, decoder) = decoder.decode_field("endpoint")?;
        let (state, decoder) = decoder.decode_field("state")?;
        let (priority, decoder) = decoder.decode_field("priority")?;
        let config = NodeConfig {
            node,
            state,
            priority,
        };
        Ok((config, decoder.finish()?))
    }
}

/// Keccak digest of a node id, the coordinate used for XOR distance.
pub(crate) fn node_id_hash(node_id: NodeId) -> H256 {
    H256(Keccak256::digest(node_id.as_bytes()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_node() -> Node {
        Node {
            ip: IpAddr::V4(Ipv4Addr::new(18, 138, 108, 67)),
            udp_port: 30303,
            tcp_port: 30303,
            node_id: H512::from_low_u64_be(0xd860),
        }
    }

    #[test]
    fn node_roundtrip() {
        let node = sample_node();
        let mut buf = vec![];
        node.encode(&mut buf);
        let decoded = Node::decode(&buf).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn node_config_roundtrip() {
        let config = NodeConfig {
            node: sample_node(),
            state: NodeState::Disconnected,
            priority: 3,
        };
        let mut buf = vec![];
        config.encode(&mut buf);
        let decoded = NodeConfig::decode(&buf).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn endpoint_addresses() {
        let node = sample_node();
        assert!(node.tcp_address().is_some());
        let mut endpoint = node.endpoint();
        endpoint.tcp_port = 0;
        assert!(endpoint.tcp_address().is_none());
        assert!(endpoint.udp_address().is_some());
    }
}
