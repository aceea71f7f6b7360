use bytes::BufMut;
use etherlight_core::{types::BlockHash, U256};
use etherlight_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::{
    message::RLPxMessage,
    utils::{snappy_compress, snappy_decompress},
};

/// Unsolicited head update from a serving peer:
/// `[headHash, headNumber, headTd, reorgDepth, [key/value pairs...]]`.
/// The trailing pairs are optional extensions and are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Announce {
    pub head_hash: BlockHash,
    pub head_number: u64,
    pub head_td: U256,
    pub reorg_depth: u64,
}

impl RLPxMessage for Announce {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.head_hash)
            .encode_field(&self.head_number)
            .encode_field(&self.head_td)
            .encode_field(&self.reorg_depth)
            .encode_field(&Vec::<u8>::new())
            .finish();
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (head_hash, decoder) = decoder.decode_field("headHash")?;
        let (head_number, decoder) = decoder.decode_field("headNumber")?;
        let (head_td, decoder) = decoder.decode_field("headTd")?;
        let (reorg_depth, decoder) = decoder.decode_field("reorgDepth")?;
        // Extension pairs may follow
        let _padding = decoder.finish_unchecked();

        Ok(Self {
            head_hash,
            head_number,
            head_td,
            reorg_depth,
        })
    }
}
