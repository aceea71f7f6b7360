use etherlight_core::H512;
use std::{net::SocketAddr, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct BootNode {
    pub node_id: H512,
    pub socket_address: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid enode url: {0}")]
pub struct ParseBootNodeError(String);

impl FromStr for BootNode {
    type Err = ParseBootNodeError;
    /// Takes a str with the format "enode://nodeID@IPaddress:port" and
    /// parses it to a BootNode
    fn from_str(input: &str) -> Result<BootNode, ParseBootNodeError> {
        let rest = input
            .strip_prefix("enode://")
            .ok_or_else(|| ParseBootNodeError("missing enode:// prefix".to_string()))?;
        let (id, addr) = rest
            .split_once('@')
            .ok_or_else(|| ParseBootNodeError("missing @ separator".to_string()))?;
        let node_id =
            H512::from_str(id).map_err(|_| ParseBootNodeError("invalid node id".to_string()))?;
        let socket_address: SocketAddr = addr
            .parse()
            .map_err(|_| ParseBootNodeError("invalid address and port".to_string()))?;
        Ok(BootNode {
            node_id,
            socket_address,
        })
    }
}

/// Frontier/Homestead era mainnet bootstrap list (the Go Ethereum seeds).
pub fn mainnet_bootnodes() -> Vec<BootNode> {
    [
        "enode://d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666@18.138.108.67:30303",
        "enode://22a8232c3abc76a16ae9d6c3b164f98775fe226f0917b0ca871128a74a8e9630b458460865bab457221f1d448dd9791d24c4e5d88786180ac185df813a68d4de@3.209.45.79:30303",
        "enode://2b252ab6a1d0f971d9722cb839a42cb81db019ba44c08754628ab4a823487071b5695317c8ccd085219c3a03af063495b2f1da8d18218da2d6a82981b45e6ffc@65.108.70.101:30303",
        "enode://4aeb4ab6c14b23e2c4cfdce879c04b0748a20d8e9b59e25ded2a08143e265c6c25936e74cbc8e641e3312ca288673d91f2f93f8e277de3cfa444ecdaaf982052@157.90.35.166:30303",
    ]
    .iter()
    .map(|enode| BootNode::from_str(enode).expect("invalid mainnet bootnode"))
    .collect()
}

/// Ropsten bootstrap list.
pub fn testnet_bootnodes() -> Vec<BootNode> {
    [
        "enode://30b7ab30a01c124a6cceca36863ece12c4f5fa68e3ba9b0b51407ccc002eeed3b3102d20a88f1c1d3c3154e2449317b8ef95090e77b312d5cc39354f86d5d606@52.176.7.10:30303",
        "enode://865a63255b3bb68023b6bffd5095118fcc13e79dcf014fe4e47e065c350c7cc72af2e53eff895f11ba1bbb6a2b33271c1116ee870f266618eadfc2e78aa7349c@52.176.100.77:30303",
    ]
    .iter()
    .map(|enode| BootNode::from_str(enode).expect("invalid testnet bootnode"))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bootnode_from_string() {
        let input = "enode://d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666@18.138.108.67:30303";
        let bootnode = BootNode::from_str(input).unwrap();
        let node_id = H512::from_str(
            "d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666")
            .unwrap();
        let socket_address = SocketAddr::from_str("18.138.108.67:30303").unwrap();
        let expected_bootnode = BootNode {
            node_id,
            socket_address,
        };
        assert_eq!(bootnode, expected_bootnode);
    }

    #[test]
    fn reject_malformed_enode() {
        assert!(BootNode::from_str("enode://nope").is_err());
        assert!(BootNode::from_str("http://example.com").is_err());
    }

    #[test]
    fn builtin_bootnode_lists_parse() {
        assert!(!mainnet_bootnodes().is_empty());
        assert!(!testnet_bootnodes().is_empty());
    }
}
