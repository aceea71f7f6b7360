use ethereum_types::H256;
use etherlight_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use serde::{Deserialize, Serialize};

use super::BlockNumber;

/// Lifecycle state of a submitted transaction, as reported by a serving
/// peer's TxStatus reply. Each entry is `[tag, data]`; `data` is the
/// inclusion record for included transactions, the error message for failed
/// ones, and absent otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    Unknown,
    Queued,
    Pending,
    Included {
        block_hash: H256,
        block_number: BlockNumber,
        tx_index: u64,
    },
    Errored {
        reason: String,
    },
}

impl TransactionStatus {
    pub fn tag(&self) -> u8 {
        match self {
            TransactionStatus::Unknown => 0,
            TransactionStatus::Queued => 1,
            TransactionStatus::Pending => 2,
            TransactionStatus::Included { .. } => 3,
            TransactionStatus::Errored { .. } => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Included { .. } | TransactionStatus::Errored { .. }
        )
    }
}

impl RLPEncode for TransactionStatus {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        let encoder = Encoder::new(buf).encode_field(&self.tag());
        match self {
            TransactionStatus::Included {
                block_hash,
                block_number,
                tx_index,
            } => encoder
                .encode_field(&(*block_hash, *block_number, *tx_index))
                .finish(),
            TransactionStatus::Errored { reason } => encoder.encode_field(reason).finish(),
            _ => encoder.finish(),
        }
    }
}

impl RLPDecode for TransactionStatus {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (tag, decoder): (u8, _) = decoder.decode_field("status")?;
        let (status, decoder) = match tag {
            0 => (TransactionStatus::Unknown, decoder),
            1 => (TransactionStatus::Queued, decoder),
            2 => (TransactionStatus::Pending, decoder),
            3 => {
                let ((block_hash, block_number, tx_index), decoder) =
                    decoder.decode_field("inclusion")?;
                (
                    TransactionStatus::Included {
                        block_hash,
                        block_number,
                        tx_index,
                    },
                    decoder,
                )
            }
            4 => {
                let (reason, decoder) = decoder.decode_field("error")?;
                (TransactionStatus::Errored { reason }, decoder)
            }
            other => {
                return Err(RLPDecodeError::Custom(format!(
                    "Invalid transaction status: {other}"
                )))
            }
        };
        Ok((status, decoder.finish()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips() {
        let statuses = [
            TransactionStatus::Unknown,
            TransactionStatus::Queued,
            TransactionStatus::Pending,
            TransactionStatus::Included {
                block_hash: H256::from_low_u64_be(0xf16b),
                block_number: 5_202_375,
                tx_index: 39,
            },
            TransactionStatus::Errored {
                reason: "known transaction".to_string(),
            },
        ];
        for status in statuses {
            let mut buf = vec![];
            status.encode(&mut buf);
            let decoded = TransactionStatus::decode(&buf).unwrap();
            assert_eq!(decoded, status);
        }
    }
}
