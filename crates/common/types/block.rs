use crate::{
    types::{Receipt, Transaction},
    Address, H256, U256,
};
use bytes::Bytes;
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use ethereum_types::Bloom;
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

pub type BlockNumber = u64;
pub type BlockHash = H256;

use lazy_static::lazy_static;

lazy_static! {
    /// Keccak256(RLP([])), the ommers hash of a block without uncles.
    pub static ref DEFAULT_OMMERS_HASH: H256 = H256::from_slice(
        &hex::decode("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347").unwrap()
    );
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl RLPEncode for Block {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.header)
            .encode_field(&self.body.transactions)
            .encode_field(&self.body.ommers)
            .finish();
    }
}

impl RLPDecode for Block {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (header, decoder) = decoder.decode_field("header")?;
        let (transactions, decoder) = decoder.decode_field("transactions")?;
        let (ommers, decoder) = decoder.decode_field("ommers")?;
        let remaining = decoder.finish()?;
        let body = BlockBody {
            transactions,
            ommers,
        };
        let block = Block { header, body };
        Ok((block, remaining))
    }
}

/// Header part of a block on the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: H256,
    #[serde(rename(serialize = "sha3Uncles"))]
    pub ommers_hash: H256, // ommer = uncle
    #[serde(rename(serialize = "miner"))]
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    #[serde(default)]
    pub difficulty: U256,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub number: BlockNumber,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub gas_limit: u64,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub gas_used: u64,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub timestamp: u64,
    #[serde(with = "crate::serde_utils::bytes")]
    pub extra_data: Bytes,
    #[serde(rename(serialize = "mixHash"))]
    pub prev_randao: H256,
    #[serde(with = "crate::serde_utils::u64::hex_str_padding")]
    pub nonce: u64,
    // Fields introduced after the proof-of-work era; absent from the headers
    // a light client fetches on pre-merge chains.
    #[serde(with = "crate::serde_utils::u64::hex_str_opt", default)]
    pub base_fee_per_gas: Option<u64>,
    pub withdrawals_root: Option<H256>,
    #[serde(with = "crate::serde_utils::u64::hex_str_opt", default)]
    pub blob_gas_used: Option<u64>,
    #[serde(with = "crate::serde_utils::u64::hex_str_opt", default)]
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<H256>,
}

impl RLPEncode for BlockHeader {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.parent_hash)
            .encode_field(&self.ommers_hash)
            .encode_field(&self.coinbase)
            .encode_field(&self.state_root)
            .encode_field(&self.transactions_root)
            .encode_field(&self.receipts_root)
            .encode_field(&self.logs_bloom)
            .encode_field(&self.difficulty)
            .encode_field(&self.number)
            .encode_field(&self.gas_limit)
            .encode_field(&self.gas_used)
            .encode_field(&self.timestamp)
            .encode_field(&self.extra_data)
            .encode_field(&self.prev_randao)
            .encode_field(&self.nonce.to_be_bytes())
            .encode_optional_field(&self.base_fee_per_gas)
            .encode_optional_field(&self.withdrawals_root)
            .encode_optional_field(&self.blob_gas_used)
            .encode_optional_field(&self.excess_blob_gas)
            .encode_optional_field(&self.parent_beacon_block_root)
            .finish();
    }
}

impl RLPDecode for BlockHeader {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (parent_hash, decoder) = decoder.decode_field("parent_hash")?;
        let (ommers_hash, decoder) = decoder.decode_field("ommers_hash")?;
        let (coinbase, decoder) = decoder.decode_field("coinbase")?;
        let (state_root, decoder) = decoder.decode_field("state_root")?;
        let (transactions_root, decoder) = decoder.decode_field("transactions_root")?;
        let (receipts_root, decoder) = decoder.decode_field("receipts_root")?;
        let (logs_bloom, decoder) = decoder.decode_field("logs_bloom")?;
        let (difficulty, decoder) = decoder.decode_field("difficulty")?;
        let (number, decoder) = decoder.decode_field("number")?;
        let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
        let (gas_used, decoder) = decoder.decode_field("gas_used")?;
        let (timestamp, decoder) = decoder.decode_field("timestamp")?;
        let (extra_data, decoder) = decoder.decode_field("extra_data")?;
        let (prev_randao, decoder) = decoder.decode_field("prev_randao")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let nonce = u64::from_be_bytes(nonce);
        let (base_fee_per_gas, decoder) = decoder.decode_optional_field();
        let (withdrawals_root, decoder) = decoder.decode_optional_field();
        let (blob_gas_used, decoder) = decoder.decode_optional_field();
        let (excess_blob_gas, decoder) = decoder.decode_optional_field();
        let (parent_beacon_block_root, decoder) = decoder.decode_optional_field();

        Ok((
            BlockHeader {
                parent_hash,
                ommers_hash,
                coinbase,
                state_root,
                transactions_root,
                receipts_root,
                logs_bloom,
                difficulty,
                number,
                gas_limit,
                gas_used,
                timestamp,
                extra_data,
                prev_randao,
                nonce,
                base_fee_per_gas,
                withdrawals_root,
                blob_gas_used,
                excess_blob_gas,
                parent_beacon_block_root,
            },
            decoder.finish()?,
        ))
    }
}

impl BlockHeader {
    pub fn compute_block_hash(&self) -> H256 {
        let mut buf = vec![];
        self.encode(&mut buf);
        keccak(buf)
    }
}

/// The body of a block: its transactions plus any ommer headers.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
    pub ommers: Vec<BlockHeader>,
}

impl BlockBody {
    pub const fn empty() -> Self {
        Self {
            transactions: Vec::new(),
            ommers: Vec::new(),
        }
    }
}

impl RLPEncode for BlockBody {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.transactions)
            .encode_field(&self.ommers)
            .finish();
    }
}

impl RLPDecode for BlockBody {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (transactions, decoder) = decoder.decode_field("transactions")?;
        let (ommers, decoder) = decoder.decode_field("ommers")?;
        Ok((
            BlockBody {
                transactions,
                ommers,
            },
            decoder.finish()?,
        ))
    }
}

#[allow(unused)]
pub fn compute_receipts_count(receipts: &[Vec<Receipt>]) -> usize {
    receipts.iter().map(|r| r.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_roundtrip() {
        let header = BlockHeader {
            parent_hash: H256::from_low_u64_be(1),
            ommers_hash: *DEFAULT_OMMERS_HASH,
            coinbase: Address::from_low_u64_be(2),
            state_root: H256::from_low_u64_be(3),
            transactions_root: H256::from_low_u64_be(4),
            receipts_root: H256::from_low_u64_be(5),
            logs_bloom: Bloom::zero(),
            difficulty: U256::from(1646221191783396u64),
            number: 4_732_522,
            gas_limit: 8_000_029,
            gas_used: 8_003_540,
            timestamp: 1_513_020_487,
            extra_data: Bytes::from_static(b"etherlight"),
            prev_randao: H256::zero(),
            nonce: 0x1234_5678_9abc_def0,
            ..Default::default()
        };
        let mut buf = vec![];
        header.encode(&mut buf);
        let decoded = BlockHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn block_body_roundtrip() {
        let body = BlockBody::empty();
        let mut buf = vec![];
        body.encode(&mut buf);
        let decoded = BlockBody::decode(&buf).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn header_serializes_to_camel_case_json() {
        let header = BlockHeader::default();
        let json = serde_json::to_value(&header).unwrap();
        assert!(json.get("parentHash").is_some());
        assert!(json.get("sha3Uncles").is_some());
        assert!(json.get("miner").is_some());
        assert!(json.get("gasUsed").is_some());
    }

    #[test]
    fn block_hash_changes_with_contents() {
        let header = BlockHeader::default();
        let mut other = header.clone();
        other.number = 1;
        assert_ne!(header.compute_block_hash(), other.compute_block_hash());
    }
}
