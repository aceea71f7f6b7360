pub(crate) mod connection;
pub(crate) mod error;
pub(crate) mod frame;
pub(crate) mod handshake;
pub(crate) mod les;
pub(crate) mod message;
pub(crate) mod p2p;
pub(crate) mod utils;
