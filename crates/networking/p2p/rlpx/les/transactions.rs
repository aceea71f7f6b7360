use bytes::{BufMut, Bytes};
use etherlight_core::{types::TransactionStatus, H256};
use etherlight_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::{
    message::RLPxMessage,
    utils::{snappy_compress, snappy_decompress},
};

/// SendTxV2 (0x13): `[reqID, [rawTx...]]`. Each entry is the raw RLP of a
/// signed transaction; the server answers with a TxStatus carrying the same
/// request id.
#[derive(Debug, Clone)]
pub(crate) struct SendTx2 {
    pub id: u64,
    pub transactions: Vec<Bytes>,
}

impl SendTx2 {
    pub fn new(id: u64, transactions: Vec<Bytes>) -> Self {
        Self { id, transactions }
    }
}

impl RLPxMessage for SendTx2 {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut txs = vec![];
        let mut tx_encoder = Encoder::new(&mut txs);
        for raw in &self.transactions {
            // already-encoded transaction payloads
            tx_encoder = tx_encoder.encode_raw(raw);
        }
        tx_encoder.finish();

        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_raw(&txs)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (txs_item, _) = decoder.get_encoded_item()?;

        // Each transaction is kept as its raw encoding.
        let mut transactions = vec![];
        let mut txs_decoder = Decoder::new(&txs_item)?;
        while txs_decoder.has_remaining() {
            let (raw, rest) = txs_decoder.get_encoded_item()?;
            txs_decoder = rest;
            transactions.push(Bytes::from(raw));
        }

        Ok(Self::new(id, transactions))
    }
}

/// GetTxStatus (0x14): `[reqID, [txHash...]]`.
#[derive(Debug, Clone)]
pub(crate) struct GetTxStatus {
    pub id: u64,
    pub tx_hashes: Vec<H256>,
}

impl GetTxStatus {
    pub fn new(id: u64, tx_hashes: Vec<H256>) -> Self {
        Self { id, tx_hashes }
    }
}

impl RLPxMessage for GetTxStatus {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.tx_hashes)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("reqID")?;
        let (tx_hashes, _): (Vec<H256>, _) = decoder.decode_field("txHashes")?;

        Ok(Self::new(id, tx_hashes))
    }
}

/// TxStatus (0x15): `[reqID, BV, [status...]]`, one status per queried hash
/// in request order.
#[derive(Debug)]
pub(crate) struct TxStatus {
    pub id: u64,
    pub bv: u64,
    pub statuses: Vec<TransactionStatus>,
}

impl TxStatus {
    pub fn new(id: u64, bv: u64, statuses: Vec<TransactionStatus>) -> Self {
        Self { id, bv, statuses }
    }
}

impl RLPxMessage for TxStatus {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.bv)
            .encode_field(&self.statuses)
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
        let (statuses, _): (Vec<TransactionStatus>, _) = decoder.decode_field("statuses")?;

        Ok(Self::new(id, bv, statuses))
    }
}
