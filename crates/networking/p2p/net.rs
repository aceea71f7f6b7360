//! A light-client implementation of the Light Ethereum Subprotocol (LES/2):
//! discovery, the RLPx transport, per-peer sessions with credit-based flow
//! control, and a request manager that fans logical queries out over the
//! peer set and assembles their answers.

pub mod bootnode;
pub mod client;
pub(crate) mod discovery;
pub(crate) mod discv4;
pub(crate) mod flow;
pub(crate) mod kademlia;
pub(crate) mod node;
pub(crate) mod provisioner;
pub(crate) mod rlpx;
pub mod error;
pub mod types;

pub(crate) const MAX_DISC_PACKET_SIZE: usize = 1280;

pub use bootnode::BootNode;
pub use client::{
    Announcement, AnnounceCallback, Head, LesClient, LesConfig, LesHandle, Network,
    SaveNodesCallback, StatusCallback,
};
pub use error::LesError;
pub use provisioner::{CompletionHandle, DispatchPolicy, ProofSpec, ProvisionerId};
pub use rlpx::les::blocks::HashOrNumber;
pub use types::{Endpoint, Node, NodeConfig, NodeId, NodeState};
