use bytes::BufMut;
use etherlight_core::types::{BlockBody, BlockHash, BlockHeader, BlockNumber};
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

// A 32-byte hash is a 0-55 byte string for RLP, so its prefix is
// 0x80 + 32 = 0xa0 (160). Anything shorter is a block number.
pub const HASH_FIRST_BYTE_DECODER: u8 = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(BlockHash),
    Number(BlockNumber),
}

impl From<BlockHash> for HashOrNumber {
    fn from(hash: BlockHash) -> Self {
        Self::Hash(hash)
    }
}

impl From<BlockNumber> for HashOrNumber {
    fn from(number: BlockNumber) -> Self {
        Self::Number(number)
    }
}

impl RLPEncode for HashOrNumber {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            HashOrNumber::Hash(hash) => hash.encode(buf),
            HashOrNumber::Number(number) => number.encode(buf),
        }
    }

    fn length(&self) -> usize {
        match self {
            HashOrNumber::Hash(hash) => hash.length(),
            HashOrNumber::Number(number) => number.length(),
        }
    }
}

impl RLPDecode for HashOrNumber {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first_byte = buf.first().ok_or(RLPDecodeError::InvalidLength)?;
        if *first_byte == HASH_FIRST_BYTE_DECODER {
            let (hash, rest) = BlockHash::decode_unfinished(buf)?;
            return Ok((Self::Hash(hash), rest));
        }

        let (number, rest) = u64::decode_unfinished(buf)?;
        Ok((Self::Number(number), rest))
    }
}

/// GetBlockHeaders (0x02): `[reqID, [start, maxHeaders, skip, reverse]]`.
#[derive(Debug, Clone)]
pub(crate) struct GetBlockHeaders {
    // id is chosen by us; the responding peer mirrors it back
    pub id: u64,
    pub start: HashOrNumber,
    pub limit: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl GetBlockHeaders {
    pub fn new(id: u64, start: HashOrNumber, limit: u64, skip: u64, reverse: bool) -> Self {
        Self {
            id,
            start,
            limit,
            skip,
            reverse,
        }
    }
}

impl RLPxMessage for GetBlockHeaders {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut query = vec![];
        Encoder::new(&mut query)
            .encode_field(&self.start)
            .encode_field(&self.limit)
            .encode_field(&self.skip)
            .encode_field(&self.reverse)
            .finish();

        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_raw(&query)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let ((start, limit, skip, reverse), _): ((HashOrNumber, u64, u64, bool), _) =
            decoder.decode_field("query")?;
        Ok(Self::new(id, start, limit, skip, reverse))
    }
}

/// BlockHeaders (0x03): `[reqID, BV, headers]`.
#[derive(Debug)]
pub(crate) struct BlockHeaders {
    pub id: u64,
    pub bv: u64,
    pub headers: Vec<BlockHeader>,
}

impl BlockHeaders {
    pub fn new(id: u64, bv: u64, headers: Vec<BlockHeader>) -> Self {
        Self { id, bv, headers }
    }
}

impl RLPxMessage for BlockHeaders {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.bv)
            .encode_field(&self.headers)
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
        let (headers, _): (Vec<BlockHeader>, _) = decoder.decode_field("headers")?;

        Ok(Self::new(id, bv, headers))
    }
}

/// GetBlockBodies (0x04): `[reqID, [hash...]]`.
#[derive(Debug, Clone)]
pub(crate) struct GetBlockBodies {
    pub id: u64,
    pub block_hashes: Vec<BlockHash>,
}

impl GetBlockBodies {
    pub fn new(id: u64, block_hashes: Vec<BlockHash>) -> Self {
        Self { block_hashes, id }
    }
}

impl RLPxMessage for GetBlockBodies {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.block_hashes)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (block_hashes, _): (Vec<BlockHash>, _) = decoder.decode_field("blockHashes")?;

        Ok(Self::new(id, block_hashes))
    }
}

/// BlockBodies (0x05): `[reqID, BV, [body...]]`, bodies in request order.
#[derive(Debug)]
pub(crate) struct BlockBodies {
    pub id: u64,
    pub bv: u64,
    pub bodies: Vec<BlockBody>,
}

impl BlockBodies {
    pub fn new(id: u64, bv: u64, bodies: Vec<BlockBody>) -> Self {
        Self { id, bv, bodies }
    }
}

impl RLPxMessage for BlockBodies {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.bv)
            .encode_field(&self.bodies)
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
        let (bodies, _): (Vec<BlockBody>, _) = decoder.decode_field("bodies")?;

        Ok(Self::new(id, bv, bodies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_block_headers_start_number_roundtrip() {
        let request = GetBlockHeaders::new(1, HashOrNumber::Number(4_732_522), 3, 0, false);

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        let decoded = GetBlockHeaders::decode(&buf).unwrap();
        assert_eq!(decoded.id, 1);
        assert_eq!(decoded.start, HashOrNumber::Number(4_732_522));
        assert_eq!(decoded.limit, 3);
        assert_eq!(decoded.skip, 0);
        assert!(!decoded.reverse);
    }

    #[test]
    fn get_block_headers_start_hash_roundtrip() {
        let request =
            GetBlockHeaders::new(7, HashOrNumber::Hash(BlockHash::from([1; 32])), 2, 1, true);

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        let decoded = GetBlockHeaders::decode(&buf).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.start, HashOrNumber::Hash(BlockHash::from([1; 32])));
        assert_eq!(decoded.skip, 1);
        assert!(decoded.reverse);
    }

    #[test]
    fn block_headers_roundtrip() {
        let headers = vec![BlockHeader::default(), BlockHeader::default()];
        let response = BlockHeaders::new(1, 150_000, headers.clone());

        let mut buf = Vec::new();
        response.encode(&mut buf).unwrap();

        let decoded = BlockHeaders::decode(&buf).unwrap();
        assert_eq!(decoded.id, 1);
        assert_eq!(decoded.bv, 150_000);
        assert_eq!(decoded.headers, headers);
    }

    #[test]
    fn get_block_bodies_roundtrip() {
        let hashes = vec![
            BlockHash::from([0; 32]),
            BlockHash::from([1; 32]),
            BlockHash::from([2; 32]),
        ];
        let request = GetBlockBodies::new(1, hashes.clone());

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        let decoded = GetBlockBodies::decode(&buf).unwrap();
        assert_eq!(decoded.id, 1);
        assert_eq!(decoded.block_hashes, hashes);
    }

    #[test]
    fn block_bodies_empty_roundtrip() {
        let response = BlockBodies::new(1, 0, vec![]);

        let mut buf = Vec::new();
        response.encode(&mut buf).unwrap();

        let decoded = BlockBodies::decode(&buf).unwrap();
        assert_eq!(decoded.id, 1);
        assert!(decoded.bodies.is_empty());
    }
}
