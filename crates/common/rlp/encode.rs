use bytes::{BufMut, Bytes};
use ethereum_types::U256;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tinyvec::ArrayVec;

use super::constants::{RLP_EMPTY_LIST, RLP_NULL};

/// Function for encoding a value to RLP.
/// For encoding the value into a buffer directly, use [`RLPEncode::encode`].
pub fn encode<T: RLPEncode>(value: T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

impl RLPEncode for bool {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }

    #[inline(always)]
    fn length(&self) -> usize {
        1
    }
}

// Unsigned integers encode as their big-endian bytes with leading zeros
// stripped. Zero is the empty string, and a single byte below 0x80 is its
// own encoding.
macro_rules! impl_encode_for_uint {
    ($($t:ty => $bytes:literal),* $(,)?) => {
        $(impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                match *self {
                    0 => buf.put_u8(RLP_NULL),
                    n @ 1..=0x7f => buf.put_u8(n as u8),
                    n => {
                        let mut bytes = ArrayVec::<[u8; $bytes]>::new();
                        bytes.extend_from_slice(&n.to_be_bytes());
                        let start = bytes.iter().position(|&x| x != 0).unwrap();
                        let len = bytes.len() - start;
                        buf.put_u8(RLP_NULL + len as u8);
                        buf.put_slice(&bytes[start..]);
                    }
                }
            }
        })*
    };
}

impl_encode_for_uint!(u8 => 8, u16 => 8, u32 => 8, u64 => 8, usize => 8, u128 => 16);

impl RLPEncode for () {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(RLP_NULL);
    }
}

impl RLPEncode for [u8] {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.len() == 1 && self[0] < RLP_NULL {
            buf.put_u8(self[0]);
        } else {
            let len = self.len();
            if len < 56 {
                buf.put_u8(RLP_NULL + len as u8);
            } else {
                let mut bytes = ArrayVec::<[u8; 8]>::new();
                bytes.extend_from_slice(&len.to_be_bytes());
                let start = bytes.iter().position(|&x| x != 0).unwrap();
                let len = bytes.len() - start;
                buf.put_u8(0xb7 + len as u8);
                buf.put_slice(&bytes[start..]);
            }
            buf.put_slice(self);
        }
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for &str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let leading_zeros_in_bytes: usize = (self.leading_zeros() / 8) as usize;
        let mut bytes: [u8; 32] = [0; 32];
        self.to_big_endian(&mut bytes);
        bytes[leading_zeros_in_bytes..].encode(buf)
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.is_empty() {
            buf.put_u8(RLP_EMPTY_LIST);
        } else {
            let mut total_len = 0;
            for item in self {
                total_len += item.length();
            }
            encode_length(total_len, buf);
            for item in self {
                item.encode(buf);
            }
        }
    }
}

pub fn encode_length(total_len: usize, buf: &mut dyn BufMut) {
    if total_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + total_len as u8);
    } else {
        let mut bytes = ArrayVec::<[u8; 8]>::new();
        bytes.extend_from_slice(&total_len.to_be_bytes());
        let start = bytes.iter().position(|&x| x != 0).unwrap();
        let len = bytes.len() - start;
        buf.put_u8(0xf7 + len as u8);
        buf.put_slice(&bytes[start..]);
    }
}

// Tuples encode as fixed-length lists.
macro_rules! impl_encode_for_tuple {
    ($(($($elem:ident : $idx:tt),+)),* $(,)?) => {
        $(impl<$($elem: RLPEncode),+> RLPEncode for ($($elem,)+) {
            fn encode(&self, buf: &mut dyn BufMut) {
                let total_len = 0 $(+ self.$idx.length())+;
                encode_length(total_len, buf);
                $(self.$idx.encode(buf);)+
            }
        })*
    };
}

impl_encode_for_tuple!(
    (S: 0, T: 1),
    (S: 0, T: 1, U: 2),
    (S: 0, T: 1, U: 2, V: 3),
    (S: 0, T: 1, U: 2, V: 3, W: 4),
);

impl RLPEncode for Ipv4Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.octets().encode(buf)
    }
}

impl RLPEncode for Ipv6Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.octets().encode(buf)
    }
}

impl RLPEncode for IpAddr {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            IpAddr::V4(ip) => ip.encode(buf),
            IpAddr::V6(ip) => ip.encode(buf),
        }
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

// encoding for Ethereum types

impl RLPEncode for ethereum_types::H32 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::H64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::H128 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::Address {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::H512 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::Signature {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for ethereum_types::Bloom {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.0.encode(buf)
    }
}
