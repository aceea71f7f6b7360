use bytes::{BufMut, Bytes};
use etherlight_core::types::BlockHash;
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::{
    message::RLPxMessage,
    utils::{snappy_compress, snappy_decompress},
};

/// One trie-proof request: `[blockHash, key1, key2, fromLevel]`.
/// `key1` is the account-trie key, `key2` the storage-trie key; an empty
/// string means the key is omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProofRequest {
    pub block_hash: BlockHash,
    pub key1: Bytes,
    pub key2: Bytes,
    pub from_level: u64,
}

impl RLPEncode for ProofRequest {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.block_hash)
            .encode_field(&self.key1)
            .encode_field(&self.key2)
            .encode_field(&self.from_level)
            .finish()
    }
}

impl RLPDecode for ProofRequest {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (block_hash, decoder) = decoder.decode_field("blockHash")?;
        let (key1, decoder) = decoder.decode_field("key1")?;
        let (key2, decoder) = decoder.decode_field("key2")?;
        let (from_level, decoder) = decoder.decode_field("fromLevel")?;
        let request = ProofRequest {
            block_hash,
            key1,
            key2,
            from_level,
        };
        Ok((request, decoder.finish()?))
    }
}

/// GetProofsV2 (0x0f): `[reqID, [proofRequest...]]`.
#[derive(Debug, Clone)]
pub(crate) struct GetProofsV2 {
    pub id: u64,
    pub requests: Vec<ProofRequest>,
}

impl GetProofsV2 {
    pub fn new(id: u64, requests: Vec<ProofRequest>) -> Self {
        Self { id, requests }
    }
}

impl RLPxMessage for GetProofsV2 {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.requests)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (requests, _): (Vec<ProofRequest>, _) = decoder.decode_field("requests")?;

        Ok(Self::new(id, requests))
    }
}

/// ProofsV2 (0x10): `[reqID, BV, [node...]]`, a single merged node set
/// covering every request in the batch.
#[derive(Debug)]
pub(crate) struct ProofsV2 {
    pub id: u64,
    pub bv: u64,
    pub nodes: Vec<Bytes>,
}

impl ProofsV2 {
    pub fn new(id: u64, bv: u64, nodes: Vec<Bytes>) -> Self {
        Self { id, bv, nodes }
    }
}

impl RLPxMessage for ProofsV2 {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.bv)
            .encode_field(&self.nodes)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (bv, decoder): (u64, _) = decoder.decode_field("BV")?;
        let (nodes, _): (Vec<Bytes>, _) = decoder.decode_field("nodes")?;

        Ok(Self::new(id, bv, nodes))
    }
}

/// One helper-trie request: `[subType, sectionIdx, key, fromLevel, auxReq]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HelperTrieRequest {
    pub sub_type: u64,
    pub section_index: u64,
    pub key: Bytes,
    pub from_level: u64,
    pub aux_required: u64,
}

impl RLPEncode for HelperTrieRequest {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.sub_type)
            .encode_field(&self.section_index)
            .encode_field(&self.key)
            .encode_field(&self.from_level)
            .encode_field(&self.aux_required)
            .finish()
    }
}

impl RLPDecode for HelperTrieRequest {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (sub_type, decoder) = decoder.decode_field("subType")?;
        let (section_index, decoder) = decoder.decode_field("sectionIdx")?;
        let (key, decoder) = decoder.decode_field("key")?;
        let (from_level, decoder) = decoder.decode_field("fromLevel")?;
        let (aux_required, decoder) = decoder.decode_field("auxReq")?;
        let request = HelperTrieRequest {
            sub_type,
            section_index,
            key,
            from_level,
            aux_required,
        };
        Ok((request, decoder.finish()?))
    }
}

/// GetHelperTrieProofs (0x11): `[reqID, [helperTrieRequest...]]`.
#[derive(Debug, Clone)]
pub(crate) struct GetHelperTrieProofs {
    pub id: u64,
    pub requests: Vec<HelperTrieRequest>,
}

impl RLPxMessage for GetHelperTrieProofs {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.requests)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (requests, _): (Vec<HelperTrieRequest>, _) = decoder.decode_field("requests")?;

        Ok(Self { id, requests })
    }
}

/// HelperTrieProofs (0x12): `[reqID, BV, [[node...], [auxData...]]]`.
#[derive(Debug)]
pub(crate) struct HelperTrieProofs {
    pub id: u64,
    pub bv: u64,
    pub nodes: Vec<Bytes>,
    pub aux_data: Vec<Bytes>,
}

impl RLPxMessage for HelperTrieProofs {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.bv)
            .encode_field(&(self.nodes.clone(), self.aux_data.clone()))
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (bv, decoder): (u64, _) = decoder.decode_field("BV")?;
        let ((nodes, aux_data), _): ((Vec<Bytes>, Vec<Bytes>), _) =
            decoder.decode_field("proofs")?;

        Ok(Self {
            id,
            bv,
            nodes,
            aux_data,
        })
    }
}
