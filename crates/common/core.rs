pub mod serde_utils;
pub mod types;

pub use ethereum_types::{
    Address, Bloom, Signature, H128, H160, H256, H264, H32, H512, H520, H64, U256,
};
