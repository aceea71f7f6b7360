use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SecretKey, SECP256K1,
};
use serde::Serialize;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// A transaction signature that does not recover to a sender.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid transaction signature")]
pub struct InvalidSignatureError;

impl From<secp256k1::Error> for InvalidSignatureError {
    fn from(_: secp256k1::Error) -> Self {
        InvalidSignatureError
    }
}

use etherlight_rlp::{
    constants::RLP_NULL,
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TxType {
    #[default]
    Legacy = 0x00,
    EIP2930 = 0x01,
    EIP1559 = 0x02,
    EIP4844 = 0x03,
}

impl TxType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Legacy),
            0x01 => Some(Self::EIP2930),
            0x02 => Some(Self::EIP1559),
            0x03 => Some(Self::EIP4844),
            _ => None,
        }
    }
}

/// The transaction's kind: call or create.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum TxKind {
    Call(Address),
    #[default]
    Create,
}

impl RLPEncode for TxKind {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            Self::Call(address) => address.encode(buf),
            Self::Create => buf.put_u8(RLP_NULL),
        }
    }
}

impl RLPDecode for TxKind {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first_byte = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        if *first_byte == RLP_NULL {
            return Ok((Self::Create, &rlp[1..]));
        }
        Address::decode_unfinished(rlp).map(|(t, rest)| (Self::Call(t), rest))
    }
}

/// A signed legacy transaction, the only kind a pre-merge light client
/// originates. Typed transactions appearing inside fetched block bodies are
/// carried opaquely (see [`Transaction::Typed`]).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas: u64,
    /// The recipient of the transaction.
    /// Create transactions contain a [`null`](RLP_NULL) value in this field.
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

/// A transaction inside a block body. Legacy payloads are fully decoded;
/// typed payloads (EIP-2718 envelopes) are preserved as raw bytes so body
/// decoding keeps working on post-legacy chains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    Legacy(LegacyTransaction),
    Typed(TxType, Bytes),
}

impl RLPEncode for LegacyTransaction {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.gas_price)
            .encode_field(&self.gas)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.v)
            .encode_field(&self.r)
            .encode_field(&self.s)
            .finish();
    }
}

impl RLPDecode for LegacyTransaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (gas_price, decoder) = decoder.decode_field("gas_price")?;
        let (gas, decoder) = decoder.decode_field("gas")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (value, decoder) = decoder.decode_field("value")?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (v, decoder) = decoder.decode_field("v")?;
        let (r, decoder) = decoder.decode_field("r")?;
        let (s, decoder) = decoder.decode_field("s")?;
        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas,
            to,
            value,
            data,
            v,
            r,
            s,
        };
        Ok((tx, decoder.finish()?))
    }
}

impl RLPEncode for Transaction {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            Transaction::Legacy(tx) => tx.encode(buf),
            // tx_type || payload, wrapped as an RLP byte string inside lists
            Transaction::Typed(tx_type, payload) => {
                let mut envelope = Vec::with_capacity(payload.len() + 1);
                envelope.push(*tx_type as u8);
                envelope.extend_from_slice(payload);
                envelope.as_slice().encode(buf)
            }
        }
    }
}

impl RLPDecode for Transaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first_byte = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        // Typed transactions come wrapped as a byte string whose payload
        // starts with the type tag.
        if *first_byte < RLP_NULL {
            return Err(RLPDecodeError::MalformedData);
        }
        if *first_byte < etherlight_rlp::constants::RLP_EMPTY_LIST {
            let (envelope, rest) = Bytes::decode_unfinished(rlp)?;
            let tag = *envelope.first().ok_or(RLPDecodeError::InvalidLength)?;
            let tx_type = TxType::from_u8(tag)
                .ok_or_else(|| RLPDecodeError::Custom(format!("Invalid transaction type: {tag}")))?;
            return Ok((Transaction::Typed(tx_type, envelope.slice(1..)), rest));
        }
        let (tx, rest) = LegacyTransaction::decode_unfinished(rlp)?;
        Ok((Transaction::Legacy(tx), rest))
    }
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Transaction::Legacy(_) => TxType::Legacy,
            Transaction::Typed(tx_type, _) => *tx_type,
        }
    }

    pub fn compute_hash(&self) -> H256 {
        match self {
            Transaction::Legacy(tx) => tx.compute_hash(),
            Transaction::Typed(tx_type, payload) => {
                let mut hasher = Keccak256::new();
                hasher.update([*tx_type as u8]);
                hasher.update(payload);
                H256(hasher.finalize().into())
            }
        }
    }
}

impl LegacyTransaction {
    /// Hash of the signed RLP, i.e. the transaction id.
    pub fn compute_hash(&self) -> H256 {
        let mut buf = vec![];
        self.encode(&mut buf);
        H256(Keccak256::digest(&buf).into())
    }

    /// The pre-signature digest. With a chain id the EIP-155 form
    /// `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]` is hashed.
    pub fn signing_hash(&self, chain_id: Option<u64>) -> H256 {
        let mut buf = vec![];
        let encoder = Encoder::new(&mut buf)
            .encode_field(&self.nonce)
            .encode_field(&self.gas_price)
            .encode_field(&self.gas)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data);
        match chain_id {
            Some(id) => encoder
                .encode_field(&id)
                .encode_field(&0u8)
                .encode_field(&0u8)
                .finish(),
            None => encoder.finish(),
        }
        H256(Keccak256::digest(&buf).into())
    }

    /// Signs the transaction in place, producing an EIP-155 `v` when a chain
    /// id is given.
    pub fn sign(&mut self, secret_key: &SecretKey, chain_id: Option<u64>) {
        let digest = self.signing_hash(chain_id);
        let message = Message::from_digest(digest.0);
        let (recovery_id, signature_bytes) = SECP256K1
            .sign_ecdsa_recoverable(&message, secret_key)
            .serialize_compact();
        self.r = U256::from_big_endian(&signature_bytes[..32]);
        self.s = U256::from_big_endian(&signature_bytes[32..]);
        let parity = recovery_id.to_i32() as u64;
        self.v = match chain_id {
            Some(id) => U256::from(parity + 35 + 2 * id),
            None => U256::from(parity + 27),
        };
    }

    /// Recovers the sender address from the signature.
    pub fn sender(&self) -> Result<Address, InvalidSignatureError> {
        let (parity, chain_id) = split_v(self.v);
        let mut signature_bytes = [0u8; 64];
        self.r.to_big_endian(&mut signature_bytes[..32]);
        self.s.to_big_endian(&mut signature_bytes[32..]);
        let signature = RecoverableSignature::from_compact(
            &signature_bytes,
            RecoveryId::from_i32(parity as i32)?,
        )?;
        let digest = self.signing_hash(chain_id);
        let public = SECP256K1.recover_ecdsa(&Message::from_digest(digest.0), &signature)?;
        // address = keccak256(pubkey)[12..]
        let hash = Keccak256::digest(&public.serialize_uncompressed()[1..]);
        Ok(Address::from_slice(&hash[12..]))
    }
}

/// Splits a legacy `v` into (recovery parity, EIP-155 chain id).
fn split_v(v: U256) -> (u64, Option<u64>) {
    let v = v.low_u64();
    if v >= 35 {
        ((v - 35) % 2, Some((v - 35) / 2))
    } else {
        (v.saturating_sub(27), None)
    }
}

// Hex-string serialization for debugging surfaces; the wire format is RLP.
impl Serialize for Transaction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.encode_to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sample_tx() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas: 21_000,
            to: TxKind::Call(Address::from(hex!(
                "3535353535353535353535353535353535353535"
            ))),
            value: U256::from(10u64.pow(18)),
            data: Bytes::new(),
            ..Default::default()
        }
    }

    #[test]
    fn eip155_signing_hash_matches_reference() {
        // Example from EIP-155.
        let tx = sample_tx();
        let expected =
            H256(hex!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"));
        assert_eq!(tx.signing_hash(Some(1)), expected);
    }

    #[test]
    fn sign_and_recover() {
        let secret_key = SecretKey::from_slice(&hex!(
            "4646464646464646464646464646464646464646464646464646464646464646"
        ))
        .unwrap();
        let mut tx = sample_tx();
        tx.sign(&secret_key, Some(1));
        assert!(tx.v == U256::from(37) || tx.v == U256::from(38));
        let sender = tx.sender().unwrap();
        // Address derived from the EIP-155 example key.
        assert_eq!(
            sender,
            Address::from(hex!("9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"))
        );
    }

    #[test]
    fn legacy_tx_roundtrip() {
        let secret_key = SecretKey::from_slice(&[0x17; 32]).unwrap();
        let mut tx = sample_tx();
        tx.sign(&secret_key, Some(1));
        let encoded = tx.encode_to_vec();
        let decoded = LegacyTransaction::decode(&encoded).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.compute_hash(), tx.compute_hash());
    }

    #[test]
    fn typed_tx_is_preserved_opaquely() {
        let payload = Bytes::from_static(&[0xc3, 0x01, 0x02, 0x03]);
        let tx = Transaction::Typed(TxType::EIP1559, payload.clone());
        let mut buf = vec![];
        tx.encode(&mut buf);
        let decoded = Transaction::decode(&buf).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.tx_type(), TxType::EIP1559);
    }
}
