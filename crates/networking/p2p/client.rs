use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use etherlight_core::{
    types::{
        AccountState, BlockBody, BlockHash, BlockHeader, BlockNumber, LegacyTransaction, Receipt,
        TransactionStatus,
    },
    Address, H256, U256,
};
use etherlight_rlp::encode::RLPEncode;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bootnode::{mainnet_bootnodes, testnet_bootnodes, BootNode};
use crate::error::LesError;
use crate::node::{DispatchFailure, NetEvent, NodeCommand, NodeSession};
use crate::provisioner::{
    CompletionHandle, DispatchPolicy, LesCallback, LesRequest, Provisioner, ProvisionerId,
    ProofSpec,
};
use crate::rlpx::connection::RLPxConnection;
use crate::rlpx::les::blocks::HashOrNumber;
use crate::rlpx::les::StatusMessage;
use crate::types::{Node, NodeConfig, NodeId, NodeState};

use lazy_static::lazy_static;

lazy_static! {
    static ref MAINNET_GENESIS: H256 = hash_literal(
        "d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3"
    );
    static ref TESTNET_GENESIS: H256 = hash_literal(
        "41941023680923e0fe4d74a34bdac8141f2540e3ae90623718e47d66d1ca4a2d"
    );
}

/// The chain a client instance speaks for. Chooses the chain id, the genesis
/// hash and the bootstrap set.
#[derive(Clone, Debug)]
pub enum Network {
    Mainnet,
    Testnet,
    Private {
        chain_id: u64,
        genesis_hash: H256,
        bootnodes: Vec<BootNode>,
    },
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 3,
            Network::Private { chain_id, .. } => *chain_id,
        }
    }

    pub fn genesis_hash(&self) -> H256 {
        match self {
            Network::Mainnet => *MAINNET_GENESIS,
            Network::Testnet => *TESTNET_GENESIS,
            Network::Private { genesis_hash, .. } => *genesis_hash,
        }
    }

    pub fn bootnodes(&self) -> Vec<BootNode> {
        match self {
            Network::Mainnet => mainnet_bootnodes(),
            Network::Testnet => testnet_bootnodes(),
            Network::Private { bootnodes, .. } => bootnodes.clone(),
        }
    }
}

fn hash_literal(hex_str: &str) -> H256 {
    H256::from_slice(&hex::decode(hex_str).expect("invalid hash literal"))
}

/// The chain head this client trusts and advertises in its Status.
#[derive(Clone, Copy, Debug)]
pub struct Head {
    pub hash: BlockHash,
    pub number: BlockNumber,
    pub total_difficulty: U256,
}

/// A peer's unsolicited head update, as passed to the announce callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub head_hash: BlockHash,
    pub head_number: BlockNumber,
    pub head_total_difficulty: U256,
    pub reorg_depth: u64,
}

pub type AnnounceCallback = Box<dyn Fn(NodeId, &Announcement) + Send + Sync>;
pub type StatusCallback = Box<dyn Fn(NodeId, BlockHash, BlockNumber) + Send + Sync>;
pub type SaveNodesCallback = Box<dyn Fn(&[NodeConfig]) + Send + Sync>;

/// Everything a [`LesClient`] needs to run. The callbacks are optional; the
/// save-nodes callback fires whenever the persisted node set changes.
pub struct LesConfig {
    pub network: Network,
    pub head: Head,
    pub genesis_hash: H256,
    pub min_peers: usize,
    pub max_peers: usize,
    pub known_nodes: Vec<NodeConfig>,
    /// Local UDP bind address for discovery. Port 0 picks an ephemeral port.
    pub discovery_addr: SocketAddr,
    /// Per-dispatch deadline on a single node.
    pub request_timeout: Duration,
    /// Overall deadline for a logical request across all retries.
    pub request_deadline: Duration,
    pub max_attempts: usize,
    pub announce_callback: Option<AnnounceCallback>,
    pub status_callback: Option<StatusCallback>,
    pub save_nodes_callback: Option<SaveNodesCallback>,
}

impl LesConfig {
    pub fn new(network: Network, head: Head) -> Self {
        let genesis_hash = network.genesis_hash();
        Self {
            network,
            head,
            genesis_hash,
            min_peers: 1,
            max_peers: 5,
            known_nodes: Vec::new(),
            discovery_addr: "0.0.0.0:30303".parse().expect("valid discovery address"),
            request_timeout: Duration::from_secs(8),
            request_deadline: Duration::from_secs(60),
            max_attempts: 3,
            announce_callback: None,
            status_callback: None,
            save_nodes_callback: None,
        }
    }
}

enum ClientCommand {
    Start,
    Stop(oneshot::Sender<()>),
    Submit(Box<Provisioner>),
    Cancel(ProvisionerId),
    #[cfg(test)]
    AttachSession {
        node_id: NodeId,
        commands: mpsc::Sender<NodeCommand>,
    },
}

/// The LES client façade: owns the node set and the provisioner set, routes
/// responses, and applies the retry and peer-selection policy. All shared
/// state lives on a single manager task fed by a command and an event
/// mailbox.
pub struct LesClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    next_id: Arc<AtomicU64>,
    request_deadline: Duration,
    max_attempts: usize,
    #[cfg(test)]
    events_tx: mpsc::Sender<NetEvent>,
}

impl LesClient {
    /// Builds the client and spawns its manager task. Nothing touches the
    /// network until [`start`](Self::start).
    pub fn create(config: LesConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(256);

        let request_deadline = config.request_deadline;
        let max_attempts = config.max_attempts;
        let manager = Manager::new(config, events_tx.clone());
        tokio::spawn(manager.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            request_deadline,
            max_attempts,
            #[cfg(test)]
            events_tx,
        }
    }

    /// Begins discovery and outbound dialing.
    pub fn start(&self) {
        let _ = self.commands.send(ClientCommand::Start);
    }

    /// Cancels every outstanding request with `Cancelled`, drains the node
    /// set and closes the transports.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(ClientCommand::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Cancels a single request; its completion callback fires with
    /// `Cancelled`. Responses still in flight for it are discarded silently.
    pub fn cancel(&self, id: ProvisionerId) {
        let _ = self.commands.send(ClientCommand::Cancel(id));
    }

    fn submit(
        &self,
        request: LesRequest,
        callback: LesCallback,
    ) -> Result<LesHandle, LesError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.request_deadline;
        let (provisioner, completion) = Provisioner::new(
            id,
            request,
            callback,
            DispatchPolicy::SingleNode,
            deadline,
            self.max_attempts,
        );
        self.commands
            .send(ClientCommand::Submit(Box::new(provisioner)))
            .map_err(|_| LesError::Cancelled)?;
        Ok(LesHandle { id, completion })
    }

    /// Fetches up to `count` headers from `start`, stepping by `skip + 1`,
    /// descending when `reverse`. The callback fires once per header in wire
    /// order.
    pub fn get_block_headers(
        &self,
        start: impl Into<HashOrNumber>,
        count: u64,
        skip: u64,
        reverse: bool,
        callback: impl FnMut(BlockHeader) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        if count == 0 {
            return Err(LesError::InvalidInput("count must be positive".into()));
        }
        self.submit(
            LesRequest::BlockHeaders {
                start: start.into(),
                limit: count,
                skip,
                reverse,
            },
            LesCallback::Headers(Box::new(callback)),
        )
    }

    /// Fetches the bodies for the given block hashes; the callback fires
    /// once per block, in request order.
    pub fn get_block_bodies(
        &self,
        hashes: Vec<BlockHash>,
        callback: impl FnMut(BlockHash, BlockBody) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        if hashes.is_empty() {
            return Err(LesError::InvalidInput("no block hashes given".into()));
        }
        self.submit(
            LesRequest::BlockBodies { hashes },
            LesCallback::Bodies(Box::new(callback)),
        )
    }

    pub fn get_block_bodies_one(
        &self,
        hash: BlockHash,
        callback: impl FnMut(BlockHash, BlockBody) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        self.get_block_bodies(vec![hash], callback)
    }

    /// Fetches the receipt list of each given block.
    pub fn get_receipts(
        &self,
        hashes: Vec<BlockHash>,
        callback: impl FnMut(BlockHash, Vec<Receipt>) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        if hashes.is_empty() {
            return Err(LesError::InvalidInput("no block hashes given".into()));
        }
        self.submit(
            LesRequest::Receipts { hashes },
            LesCallback::Receipts(Box::new(callback)),
        )
    }

    pub fn get_receipts_one(
        &self,
        hash: BlockHash,
        callback: impl FnMut(BlockHash, Vec<Receipt>) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        self.get_receipts(vec![hash], callback)
    }

    /// Requests merkle proofs. Follows LES/2 verbatim: `key1` addresses the
    /// account trie, `key2` the storage trie, an empty key is omitted.
    pub fn get_proofs(
        &self,
        specs: Vec<ProofSpec>,
        callback: impl FnMut(BlockHash, Vec<Bytes>) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        if specs.is_empty() {
            return Err(LesError::InvalidInput("no proof requests given".into()));
        }
        self.submit(
            LesRequest::Proofs { specs },
            LesCallback::Proofs(Box::new(callback)),
        )
    }

    pub fn get_proofs_one(
        &self,
        block_hash: BlockHash,
        key1: Bytes,
        key2: Bytes,
        from_level: u64,
        callback: impl FnMut(BlockHash, Vec<Bytes>) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        self.get_proofs(
            vec![ProofSpec {
                block_hash,
                key1,
                key2,
                from_level,
            }],
            callback,
        )
    }

    /// Resolves an account's state at the given block through a state-trie
    /// proof.
    pub fn get_account_state(
        &self,
        block_number: BlockNumber,
        block_hash: BlockHash,
        address: Address,
        callback: impl FnMut(AccountState) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        self.submit(
            LesRequest::AccountState {
                block_number,
                block_hash,
                address,
            },
            LesCallback::AccountState(Box::new(callback)),
        )
    }

    /// Queries the lifecycle status of each transaction hash; entries the
    /// serving peer does not know come back as `Unknown`.
    pub fn get_transaction_status(
        &self,
        hashes: Vec<H256>,
        callback: impl FnMut(H256, TransactionStatus) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        if hashes.is_empty() {
            return Err(LesError::InvalidInput("no transaction hashes given".into()));
        }
        self.submit(
            LesRequest::TxStatus { hashes },
            LesCallback::TxStatus(Box::new(callback)),
        )
    }

    pub fn get_transaction_status_one(
        &self,
        hash: H256,
        callback: impl FnMut(H256, TransactionStatus) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        self.get_transaction_status(vec![hash], callback)
    }

    /// Relays a signed transaction to at least one serving peer. The
    /// callback reports the returned status, or `Pending` when the peer
    /// accepted the transaction without a status.
    pub fn submit_transaction(
        &self,
        transaction: &LegacyTransaction,
        callback: impl FnMut(H256, TransactionStatus) + Send + 'static,
    ) -> Result<LesHandle, LesError> {
        if transaction.r.is_zero() && transaction.s.is_zero() {
            return Err(LesError::InvalidInput("transaction is not signed".into()));
        }
        self.submit(
            LesRequest::SubmitTransaction {
                raw: Bytes::from(transaction.encode_to_vec()),
                hash: transaction.compute_hash(),
            },
            LesCallback::TxStatus(Box::new(callback)),
        )
    }

    #[cfg(test)]
    pub(crate) fn events_sender(&self) -> mpsc::Sender<NetEvent> {
        self.events_tx.clone()
    }

    #[cfg(test)]
    pub(crate) fn attach_session(&self, node_id: NodeId, commands: mpsc::Sender<NodeCommand>) {
        let _ = self
            .commands
            .send(ClientCommand::AttachSession { node_id, commands });
    }
}

/// A submitted logical request: its id (for cancellation) plus the awaitable
/// completion latch.
#[derive(Debug)]
pub struct LesHandle {
    pub id: ProvisionerId,
    completion: CompletionHandle,
}

impl LesHandle {
    /// Resolves once the request delivered every expected unit, or with its
    /// terminal error.
    pub async fn wait(self) -> Result<(), LesError> {
        self.completion.wait().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerSessionState {
    Connecting,
    Active,
}

struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    state: PeerSessionState,
    head_number: BlockNumber,
    inflight: usize,
}

struct Manager {
    signer: SigningKey,
    network: Network,
    trusted_td: U256,
    our_status: StatusMessage,
    min_peers: usize,
    max_peers: usize,
    discovery_addr: SocketAddr,
    request_timeout: Duration,
    announce_callback: Option<AnnounceCallback>,
    status_callback: Option<StatusCallback>,
    save_nodes_callback: Option<SaveNodesCallback>,
    events_tx: mpsc::Sender<NetEvent>,

    nodes: HashMap<NodeId, NodeHandle>,
    known_nodes: HashMap<NodeId, NodeConfig>,
    provisioners: HashMap<ProvisionerId, Provisioner>,
    parked: HashSet<ProvisionerId>,
    started: bool,
}

impl Manager {
    fn new(config: LesConfig, events_tx: mpsc::Sender<NetEvent>) -> Self {
        let our_status = StatusMessage::client(
            config.network.chain_id(),
            config.head.total_difficulty,
            config.head.hash,
            config.head.number,
            config.genesis_hash,
        );
        let known_nodes = config
            .known_nodes
            .into_iter()
            .map(|entry| (entry.node.node_id, entry))
            .collect();
        Self {
            signer: SigningKey::random(&mut OsRng),
            network: config.network,
            trusted_td: config.head.total_difficulty,
            our_status,
            min_peers: config.min_peers,
            max_peers: config.max_peers,
            discovery_addr: config.discovery_addr,
            request_timeout: config.request_timeout,
            announce_callback: config.announce_callback,
            status_callback: config.status_callback,
            save_nodes_callback: config.save_nodes_callback,
            events_tx,
            nodes: HashMap::new(),
            known_nodes,
            provisioners: HashMap::new(),
            parked: HashSet::new(),
            started: false,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
        mut events: mpsc::Receiver<NetEvent>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ClientCommand::Start) => self.handle_start(),
                    Some(ClientCommand::Stop(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        return;
                    }
                    Some(ClientCommand::Submit(provisioner)) => {
                        let id = provisioner.id;
                        self.provisioners.insert(id, *provisioner);
                        self.dispatch(id);
                    }
                    Some(ClientCommand::Cancel(id)) => {
                        if let Some(mut provisioner) = self.provisioners.remove(&id) {
                            provisioner.complete(Err(LesError::Cancelled));
                        }
                        self.parked.remove(&id);
                    }
                    #[cfg(test)]
                    Some(ClientCommand::AttachSession { node_id, commands }) => {
                        self.nodes.insert(node_id, NodeHandle {
                            commands,
                            state: PeerSessionState::Connecting,
                            head_number: 0,
                            inflight: 0,
                        });
                    }
                    // Every client handle dropped: release everything.
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                event = events.recv() => if let Some(event) = event {
                    self.handle_event(event);
                },
                _ = tick.tick() => {
                    self.sweep_deadlines();
                    self.retry_parked();
                }
            }
        }
    }

    fn handle_start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!(network = ?self.network, "Starting LES client");

        // Discovery keeps the candidate pool warm; dialing starts from the
        // persisted node set.
        let bootnodes = self.network.bootnodes();
        tokio::spawn(crate::discovery::discover_peers(
            self.discovery_addr,
            self.signer.clone(),
            bootnodes,
            self.events_tx.clone(),
        ));

        let seeds: Vec<Node> = self
            .known_nodes
            .values()
            .filter(|entry| entry.state == NodeState::Available)
            .map(|entry| entry.node)
            .collect();
        for node in seeds {
            self.try_dial(node);
        }
    }

    async fn shutdown(&mut self) {
        for (_, mut provisioner) in self.provisioners.drain() {
            provisioner.complete(Err(LesError::Cancelled));
        }
        self.parked.clear();
        for (_, handle) in self.nodes.drain() {
            let _ = handle.commands.try_send(NodeCommand::Disconnect);
        }
    }

    fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::StatusReceived { node_id, status } => {
                // A peer behind our trusted head is useless for this client.
                if status.head_td < self.trusted_td {
                    debug!(node = %node_id, "Peer total difficulty below trusted head, dropping");
                    if let Some(handle) = self.nodes.remove(&node_id) {
                        let _ = handle.commands.try_send(NodeCommand::Disconnect);
                    }
                    self.set_node_state(node_id, NodeState::Error);
                    return;
                }
                if let Some(handle) = self.nodes.get_mut(&node_id) {
                    handle.state = PeerSessionState::Active;
                    handle.head_number = status.head_number;
                    if let Some(callback) = &self.status_callback {
                        callback(node_id, status.head_hash, status.head_number);
                    }
                    self.set_node_state(node_id, NodeState::Available);
                    self.retry_parked();
                }
            }
            NetEvent::Announced { node_id, announce } => {
                if let Some(handle) = self.nodes.get_mut(&node_id) {
                    handle.head_number = announce.head_number;
                }
                if let Some(callback) = &self.announce_callback {
                    callback(
                        node_id,
                        &Announcement {
                            head_hash: announce.head_hash,
                            head_number: announce.head_number,
                            head_total_difficulty: announce.head_td,
                            reorg_depth: announce.reorg_depth,
                        },
                    );
                }
            }
            NetEvent::ResponseReceived {
                node_id,
                provisioner_id,
                response,
            } => {
                if let Some(handle) = self.nodes.get_mut(&node_id) {
                    handle.inflight = handle.inflight.saturating_sub(1);
                }
                let Some(provisioner) = self.provisioners.get_mut(&provisioner_id) else {
                    // Cancelled while in flight: discard silently.
                    return;
                };
                provisioner.in_flight_on = None;
                match provisioner.absorb(response) {
                    crate::provisioner::AbsorbOutcome::Complete => {
                        if let Some(mut provisioner) = self.provisioners.remove(&provisioner_id) {
                            provisioner.complete(Ok(()));
                        }
                    }
                    crate::provisioner::AbsorbOutcome::Progress => {
                        self.dispatch(provisioner_id);
                    }
                    crate::provisioner::AbsorbOutcome::Mismatch => {
                        self.handle_dispatch_failure(
                            node_id,
                            provisioner_id,
                            DispatchFailure::Mismatch,
                        );
                    }
                }
            }
            NetEvent::DispatchFailed {
                node_id,
                provisioner_id,
                failure,
            } => {
                if let Some(handle) = self.nodes.get_mut(&node_id) {
                    handle.inflight = handle.inflight.saturating_sub(1);
                }
                self.handle_dispatch_failure(node_id, provisioner_id, failure);
            }
            NetEvent::PeerClosed { node_id, errored } => {
                self.nodes.remove(&node_id);
                self.set_node_state(
                    node_id,
                    if errored {
                        NodeState::Error
                    } else {
                        NodeState::Disconnected
                    },
                );
                // Slots waiting on this peer failed with it.
                let orphaned: Vec<ProvisionerId> = self
                    .provisioners
                    .values()
                    .filter(|provisioner| provisioner.in_flight_on == Some(node_id))
                    .map(|provisioner| provisioner.id)
                    .collect();
                for provisioner_id in orphaned {
                    self.handle_dispatch_failure(
                        node_id,
                        provisioner_id,
                        DispatchFailure::Disconnected,
                    );
                }
            }
            NetEvent::NewCandidate { node } => {
                if !self.known_nodes.contains_key(&node.node_id) {
                    self.known_nodes.insert(node.node_id, NodeConfig::new(node));
                    self.save_nodes();
                }
                self.try_dial(node);
            }
        }
    }

    fn handle_dispatch_failure(
        &mut self,
        node_id: NodeId,
        provisioner_id: ProvisionerId,
        failure: DispatchFailure,
    ) {
        let Some(provisioner) = self.provisioners.get_mut(&provisioner_id) else {
            return;
        };
        provisioner.in_flight_on = None;
        provisioner.last_failed_on = Some(node_id);
        provisioner.attempts += 1;
        if provisioner.attempts >= provisioner.max_attempts {
            let error = match failure {
                DispatchFailure::Timeout => LesError::PeerTimeout,
                DispatchFailure::Disconnected => LesError::PeerDisconnected,
                DispatchFailure::InsufficientCredit => LesError::InsufficientCredit,
                DispatchFailure::Mismatch => LesError::NoPeersAvailable,
            };
            if let Some(mut provisioner) = self.provisioners.remove(&provisioner_id) {
                provisioner.complete(Err(error));
            }
        } else {
            self.dispatch(provisioner_id);
        }
    }

    /// Selects an ACTIVE node whose advertised head covers the request,
    /// preferring the least-loaded. Requests nobody can take are parked and
    /// retried after a short backoff.
    fn dispatch(&mut self, provisioner_id: ProvisionerId) {
        let Some(provisioner) = self.provisioners.get(&provisioner_id) else {
            return;
        };
        let min_head = provisioner.request.min_head().unwrap_or(0);
        let avoid = provisioner.last_failed_on;

        let eligible = |node_id: &NodeId, handle: &NodeHandle| {
            handle.state == PeerSessionState::Active && handle.head_number >= min_head
                    && Some(*node_id) != avoid
        };
        let mut candidate = self
            .nodes
            .iter()
            .filter(|(node_id, handle)| eligible(node_id, handle))
            .min_by_key(|(_, handle)| handle.inflight)
            .map(|(node_id, _)| *node_id);
        if candidate.is_none() && avoid.is_some() {
            // Fall back to the failed node when it is the only one left.
            candidate = self
                .nodes
                .iter()
                .filter(|(_, handle)| {
                    handle.state == PeerSessionState::Active && handle.head_number >= min_head
                })
                .min_by_key(|(_, handle)| handle.inflight)
                .map(|(node_id, _)| *node_id);
        }

        let Some(node_id) = candidate else {
            self.parked.insert(provisioner_id);
            return;
        };

        let request = provisioner.request.clone();
        let handle = self.nodes.get_mut(&node_id).expect("candidate exists");
        match handle.commands.try_send(NodeCommand::Dispatch {
            provisioner_id,
            request,
        }) {
            Ok(()) => {
                handle.inflight += 1;
                if let Some(provisioner) = self.provisioners.get_mut(&provisioner_id) {
                    provisioner.in_flight_on = Some(node_id);
                }
                self.parked.remove(&provisioner_id);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Back-pressure: the peer's queue is saturated.
                self.parked.insert(provisioner_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.nodes.remove(&node_id);
                self.parked.insert(provisioner_id);
            }
        }
    }

    fn retry_parked(&mut self) {
        let parked: Vec<ProvisionerId> = self.parked.drain().collect();
        for provisioner_id in parked {
            self.dispatch(provisioner_id);
        }
    }

    /// Every provisioner completes in bounded time: requests that outlive
    /// their deadline fail with `PeerTimeout`.
    fn sweep_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<ProvisionerId> = self
            .provisioners
            .values()
            .filter(|provisioner| provisioner.deadline <= now)
            .map(|provisioner| provisioner.id)
            .collect();
        for provisioner_id in expired {
            if let Some(mut provisioner) = self.provisioners.remove(&provisioner_id) {
                provisioner.complete(Err(LesError::PeerTimeout));
            }
            self.parked.remove(&provisioner_id);
        }
    }

    fn try_dial(&mut self, node: Node) {
        if !self.started
            || self.nodes.len() >= self.max_peers
            || self.nodes.contains_key(&node.node_id)
        {
            return;
        }
        let Some(address) = node.tcp_address() else {
            return;
        };
        if self.nodes.len() < self.min_peers {
            debug!(node = %node.node_id, %address, "Dialing to reach the minimum peer count");
        }

        let (commands_tx, commands_rx) = mpsc::channel(64);
        self.nodes.insert(
            node.node_id,
            NodeHandle {
                commands: commands_tx,
                state: PeerSessionState::Connecting,
                head_number: 0,
                inflight: 0,
            },
        );

        let signer = self.signer.clone();
        let our_status = self.our_status.clone();
        let events = self.events_tx.clone();
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let conn = RLPxConnection::initiator(signer, node.node_id, stream);
                    NodeSession::new(
                        node.node_id,
                        conn,
                        commands_rx,
                        events,
                        our_status,
                        request_timeout,
                    )
                    .run()
                    .await;
                }
                Err(error) => {
                    warn!(node = %node.node_id, %address, %error, "Dial failed");
                    let _ = events
                        .send(NetEvent::PeerClosed {
                            node_id: node.node_id,
                            errored: true,
                        })
                        .await;
                }
            }
        });
    }

    fn set_node_state(&mut self, node_id: NodeId, state: NodeState) {
        if let Some(entry) = self.known_nodes.get_mut(&node_id) {
            if entry.state != state {
                entry.state = state;
                self.save_nodes();
            }
        }
    }

    fn save_nodes(&self) {
        if let Some(callback) = &self.save_nodes_callback {
            let snapshot: Vec<NodeConfig> = self.known_nodes.values().copied().collect();
            callback(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlpx::les::LES_PROTOCOL_VERSION;
    use etherlight_core::types::{Log, Transaction, TxKind, TxType};
    use etherlight_core::H512;
    use std::str::FromStr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// The block window and transaction records served by the fake peer,
    /// taken from the mainnet segment the original harness was run against.
    struct Fixture {
        headers: HashMap<u64, BlockHeader>,
        number_by_hash: HashMap<H256, u64>,
        bodies: HashMap<H256, BlockBody>,
        receipts: HashMap<H256, Vec<Receipt>>,
        statuses: HashMap<H256, TransactionStatus>,
        account_leaf: Bytes,
    }

    fn h(hex_str: &str) -> H256 {
        H256::from_str(hex_str).unwrap()
    }

    const TX_1: &str = "c070b1e539e9a329b14c95ec960779359a65be193137779bf2860dc239248d7c";
    const TX_2: &str = "78453edd2955e6ef6b200f5f9b98b3940d0d3f1528f902e7e855df56bf934cc5";
    const BLOCK_4732522: &str =
        "b812a7b4a96c87a3d7d572847b3dee352b395cc9cfe3b6f0d163bc54e7d8a78e";
    const BLOCK_4732521: &str =
        "4b29fb30276713be22786a9bdd548d787e9a2ea10248669f189b3f57f86ebaf8";
    const BLOCK_5503921: &str =
        "089a6c0b4b960261287d30ee40b1eea2da2972e7189bd381137f55540d492b2c";
    const ACCOUNT: &str = "49f4C50d9BcC7AfdbCF77e0d6e364C29D5a660DF";

    fn dummy_transactions(count: usize) -> Vec<Transaction> {
        (0..count)
            .map(|i| {
                Transaction::Legacy(LegacyTransaction {
                    nonce: i as u64,
                    gas_price: 2_000_000_000,
                    gas: 21_000,
                    to: TxKind::Call(Address::from_low_u64_be(i as u64 + 1)),
                    value: U256::from(1u64),
                    ..Default::default()
                })
            })
            .collect()
    }

    fn fixture() -> Arc<Fixture> {
        // (number, hash, parent, gasUsed, difficulty, transactionCount)
        let rows: [(u64, &str, &str, u64, u64, usize); 5] = [
            (
                4_732_524,
                "3a510c07862ebce419a14bfcd95620f924d188a935654c5ad0f4d5d7ee429193",
                "5463afdad9eb343096a6a6561d4fed4b478380d02721cdd8fab97fda058f9fa2",
                7_996_865,
                1_645_417_372_907_632,
                331,
            ),
            (
                4_732_523,
                "5463afdad9eb343096a6a6561d4fed4b478380d02721cdd8fab97fda058f9fa2",
                BLOCK_4732522,
                7_998_505,
                1_645_417_372_874_864,
                193,
            ),
            (
                4_732_522,
                BLOCK_4732522,
                BLOCK_4732521,
                8_003_540,
                1_646_221_191_783_396,
                186,
            ),
            (
                4_732_521,
                BLOCK_4732521,
                "4abb508954ec5f827184fb0d8bc74b104094d4060a06cc2dd743e4bfeaf1d8af",
                7_996_801,
                1_647_025_403_373_368,
                316,
            ),
            (
                4_732_520,
                "4abb508954ec5f827184fb0d8bc74b104094d4060a06cc2dd743e4bfeaf1d8af",
                "e8f5d7cd81ad8ae3a677f6df6d87438ee5c98ead11f8df1b90b788f059a7deab",
                7_986_707,
                1_647_830_007_836_613,
                169,
            ),
        ];

        let mut headers = HashMap::new();
        let mut number_by_hash = HashMap::new();
        let mut bodies = HashMap::new();
        let mut receipts = HashMap::new();

        for (number, hash, parent, gas_used, difficulty, tx_count) in rows {
            let hash = h(hash);
            headers.insert(
                number,
                BlockHeader {
                    number,
                    parent_hash: h(parent),
                    gas_used,
                    difficulty: U256::from(difficulty),
                    gas_limit: 8_000_029,
                    ..Default::default()
                },
            );
            number_by_hash.insert(hash, number);
            bodies.insert(
                hash,
                BlockBody {
                    transactions: dummy_transactions(tx_count),
                    ommers: vec![],
                },
            );
            receipts.insert(
                hash,
                (0..tx_count)
                    .map(|i| {
                        Receipt::new(
                            TxType::Legacy,
                            true,
                            21_000 * (i as u64 + 1),
                            if i % 50 == 0 {
                                vec![Log {
                                    address: Address::from_low_u64_be(i as u64),
                                    topics: vec![],
                                    data: Bytes::new(),
                                }]
                            } else {
                                vec![]
                            },
                        )
                    })
                    .collect(),
            );
        }

        let mut statuses = HashMap::new();
        statuses.insert(
            h(TX_1),
            TransactionStatus::Included {
                block_hash: h("f16becb908162df51c3789fab0e6ba52568fa7ee7d0127eb51bfaa0bcd40fb1b"),
                block_number: 5_202_375,
                tx_index: 39,
            },
        );
        statuses.insert(
            h(TX_2),
            TransactionStatus::Included {
                block_hash: h("0a4b16bac21b6dfeb51ccb522d8c34840844ae78ed0bc177670c501c18d35ff2"),
                block_number: 5_766_700,
                tx_index: 36,
            },
        );

        let account = AccountState {
            nonce: 1,
            balance: U256::from(499_000_000_000_000u64),
            ..Default::default()
        };
        let account_leaf = {
            let mut buf = vec![];
            (
                Bytes::from_static(&[0x20]),
                Bytes::from(account.encode_to_vec()),
            )
                .encode(&mut buf);
            Bytes::from(buf)
        };

        Arc::new(Fixture {
            headers,
            number_by_hash,
            bodies,
            receipts,
            statuses,
            account_leaf,
        })
    }

    impl Fixture {
        fn serve(&self, request: &LesRequest) -> crate::provisioner::LesResponse {
            use crate::provisioner::LesResponse;
            match request {
                LesRequest::BlockHeaders {
                    start,
                    limit,
                    skip,
                    reverse,
                } => {
                    let start_number = match start {
                        HashOrNumber::Number(number) => Some(*number),
                        HashOrNumber::Hash(hash) => self.number_by_hash.get(hash).copied(),
                    };
                    let mut headers = Vec::new();
                    if let Some(start_number) = start_number {
                        let step = *skip + 1;
                        let mut number = start_number;
                        for _ in 0..*limit {
                            let Some(header) = self.headers.get(&number) else {
                                break;
                            };
                            headers.push(header.clone());
                            number = if *reverse {
                                match number.checked_sub(step) {
                                    Some(next) => next,
                                    None => break,
                                }
                            } else {
                                number + step
                            };
                        }
                    }
                    LesResponse::Headers(headers)
                }
                LesRequest::BlockBodies { hashes } => LesResponse::Bodies(
                    hashes
                        .iter()
                        .filter_map(|hash| self.bodies.get(hash).cloned())
                        .collect(),
                ),
                LesRequest::Receipts { hashes } => LesResponse::Receipts(
                    hashes
                        .iter()
                        .filter_map(|hash| self.receipts.get(hash).cloned())
                        .collect(),
                ),
                LesRequest::Proofs { .. } | LesRequest::AccountState { .. } => {
                    LesResponse::Proofs(vec![self.account_leaf.clone()])
                }
                LesRequest::TxStatus { hashes } => LesResponse::TxStatus(
                    hashes
                        .iter()
                        .map(|hash| self.statuses.get(hash).cloned().unwrap_or_default())
                        .collect(),
                ),
                LesRequest::SubmitTransaction { .. } => LesResponse::TxStatus(vec![]),
            }
        }
    }

    fn peer_status() -> StatusMessage {
        StatusMessage {
            protocol_version: LES_PROTOCOL_VERSION,
            network_id: 1,
            head_td: U256::from(0x5000000000u64),
            head_hash: h("204167e38efa1a4d75c996491637027bb1c8b1fe0d29e8d233160b5256cb415a"),
            head_number: 6_100_000,
            genesis_hash: Network::Mainnet.genesis_hash(),
            announce_type: Some(1),
            serve_headers: true,
            serve_chain_since: Some(0),
            serve_state_since: Some(0),
            tx_relay: true,
            flow_buffer_limit: Some(300_000),
            flow_recharge_rate: Some(50_000),
            flow_cost_table: None,
        }
    }

    async fn run_fake_peer(
        node_id: NodeId,
        fixture: Arc<Fixture>,
        mut commands: mpsc::Receiver<NodeCommand>,
        events: mpsc::Sender<NetEvent>,
        broken: bool,
    ) {
        let _ = events
            .send(NetEvent::StatusReceived {
                node_id,
                status: peer_status(),
            })
            .await;
        while let Some(command) = commands.recv().await {
            match command {
                NodeCommand::Dispatch {
                    provisioner_id,
                    request,
                } => {
                    let response = if broken {
                        crate::provisioner::LesResponse::Headers(vec![])
                    } else {
                        fixture.serve(&request)
                    };
                    let _ = events
                        .send(NetEvent::ResponseReceived {
                            node_id,
                            provisioner_id,
                            response,
                        })
                        .await;
                }
                NodeCommand::Disconnect => break,
            }
        }
    }

    fn test_config() -> LesConfig {
        let mut config = LesConfig::new(
            Network::Private {
                chain_id: 1,
                genesis_hash: Network::Mainnet.genesis_hash(),
                bootnodes: vec![],
            },
            Head {
                hash: Network::Mainnet.genesis_hash(),
                number: 0,
                total_difficulty: U256::from(0x400000000u64),
            },
        );
        config.request_deadline = Duration::from_secs(5);
        config
    }

    static NEXT_PEER: AtomicU64 = AtomicU64::new(1);

    async fn attach_fake_peer(client: &LesClient, fixture: Arc<Fixture>, broken: bool) -> NodeId {
        let node_id = H512::from_low_u64_be(NEXT_PEER.fetch_add(1, Ordering::Relaxed));
        let (commands_tx, commands_rx) = mpsc::channel(64);
        client.attach_session(node_id, commands_tx);
        // Let the manager register the handle before its status lands.
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::spawn(run_fake_peer(
            node_id,
            fixture,
            commands_rx,
            client.events_sender(),
            broken,
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        node_id
    }

    #[tokio::test]
    async fn headers_forward_no_skip() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_block_headers(4_732_522u64, 3, 0, false, move |header| {
                sink.lock().unwrap().push(header)
            })
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        let numbers: Vec<u64> = seen.iter().map(|header| header.number).collect();
        assert_eq!(numbers, vec![4_732_522, 4_732_523, 4_732_524]);
        let gas_used: Vec<u64> = seen.iter().map(|header| header.gas_used).collect();
        assert_eq!(gas_used, vec![8_003_540, 7_998_505, 7_996_865]);
        // parentHash chaining across the returned window
        assert_eq!(seen[1].parent_hash, h(BLOCK_4732522));
    }

    #[tokio::test]
    async fn headers_reverse_no_skip() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_block_headers(4_732_522u64, 3, 0, true, move |header| {
                sink.lock().unwrap().push(header.number)
            })
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![4_732_522, 4_732_521, 4_732_520]);
    }

    #[tokio::test]
    async fn headers_forward_with_skip() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_block_headers(4_732_522u64, 2, 1, false, move |header| {
                sink.lock().unwrap().push(header.number)
            })
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![4_732_522, 4_732_524]);
    }

    #[tokio::test]
    async fn headers_reverse_with_skip() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_block_headers(4_732_522u64, 2, 1, true, move |header| {
                sink.lock().unwrap().push(header.number)
            })
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![4_732_522, 4_732_520]);
    }

    #[tokio::test]
    async fn block_bodies_carry_all_transactions() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_block_bodies_one(h(BLOCK_4732522), move |hash, body| {
                sink.lock().unwrap().push((hash, body))
            })
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, h(BLOCK_4732522));
        assert_eq!(seen[0].1.transactions.len(), 186);
        assert_eq!(seen[0].1.ommers.len(), 0);
    }

    #[tokio::test]
    async fn block_bodies_batch_in_request_order() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_block_bodies(
                vec![h(BLOCK_4732522), h(BLOCK_4732521)],
                move |hash, body| sink.lock().unwrap().push((hash, body.transactions.len())),
            )
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (h(BLOCK_4732522), 186));
        assert_eq!(seen[1], (h(BLOCK_4732521), 316));
    }

    #[tokio::test]
    async fn receipts_for_a_block() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_receipts_one(h(BLOCK_4732522), move |hash, receipts| {
                sink.lock().unwrap().push((hash, receipts.len()))
            })
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(h(BLOCK_4732522), 186)]);
    }

    #[tokio::test]
    async fn transaction_status_included() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_transaction_status_one(h(TX_1), move |hash, status| {
                sink.lock().unwrap().push((hash, status))
            })
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, h(TX_1));
        assert_eq!(
            seen[0].1,
            TransactionStatus::Included {
                block_hash: h(
                    "f16becb908162df51c3789fab0e6ba52568fa7ee7d0127eb51bfaa0bcd40fb1b"
                ),
                block_number: 5_202_375,
                tx_index: 39,
            }
        );
    }

    #[tokio::test]
    async fn transaction_status_batch_preserves_order() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_transaction_status(vec![h(TX_1), h(TX_2)], move |hash, status| {
                sink.lock().unwrap().push((hash, status))
            })
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, h(TX_1));
        assert!(matches!(
            seen[0].1,
            TransactionStatus::Included {
                block_number: 5_202_375,
                tx_index: 39,
                ..
            }
        ));
        assert_eq!(seen[1].0, h(TX_2));
        assert!(matches!(
            seen[1].1,
            TransactionStatus::Included {
                block_number: 5_766_700,
                tx_index: 36,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn account_state_resolves_via_proof() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .get_account_state(
                5_503_921,
                h(BLOCK_5503921),
                Address::from_str(ACCOUNT).unwrap(),
                move |state| sink.lock().unwrap().push(state),
            )
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].nonce, 1);
    }

    #[tokio::test]
    async fn proofs_deliver_the_node_set() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let counter = Arc::new(AtomicUsize::new(0));
        let sink = counter.clone();
        let handle = client
            .get_proofs_one(
                h(BLOCK_5503921),
                Bytes::from_static(&[0xaa; 32]),
                Bytes::new(),
                0,
                move |_, nodes| {
                    assert!(!nodes.is_empty());
                    sink.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();
        handle.wait().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_transaction_reports_a_status() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), false).await;

        let mut tx = LegacyTransaction {
            nonce: 0,
            gas_price: 500_000_000,
            gas: 21_000,
            to: TxKind::Call(Address::from_str(ACCOUNT).unwrap()),
            value: U256::from(500_000_000_000_000u64),
            ..Default::default()
        };
        let secret_key = secp256k1::SecretKey::from_slice(&[0x11; 32]).unwrap();
        tx.sign(&secret_key, Some(1));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = client
            .submit_transaction(&tx, move |hash, status| {
                sink.lock().unwrap().push((hash, status))
            })
            .unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, tx.compute_hash());
        assert_eq!(seen[0].1, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn retries_on_a_useless_peer() {
        let client = LesClient::create(test_config());
        attach_fake_peer(&client, fixture(), true).await;
        attach_fake_peer(&client, fixture(), false).await;

        let counter = Arc::new(AtomicUsize::new(0));
        let sink = counter.clone();
        let handle = client
            .get_block_headers(4_732_522u64, 3, 0, false, move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.wait().await.unwrap();

        // The per-unit callback fired exactly once per header even though a
        // broken peer may have been tried first.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn requests_without_peers_time_out() {
        let mut config = test_config();
        config.request_deadline = Duration::from_millis(300);
        let client = LesClient::create(config);

        let handle = client
            .get_block_headers(1u64, 1, 0, false, |_| panic!("must not deliver"))
            .unwrap();
        assert_eq!(handle.wait().await, Err(LesError::PeerTimeout));
    }

    #[tokio::test]
    async fn cancelled_requests_report_cancelled() {
        let client = LesClient::create(test_config());

        let handle = client
            .get_block_headers(1u64, 1, 0, false, |_| panic!("must not deliver"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.cancel(handle.id);
        assert_eq!(handle.wait().await, Err(LesError::Cancelled));
    }

    #[tokio::test]
    async fn stop_cancels_everything() {
        let client = LesClient::create(test_config());

        let handle = client
            .get_block_headers(1u64, 1, 0, false, |_| panic!("must not deliver"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.stop().await;
        assert_eq!(handle.wait().await, Err(LesError::Cancelled));
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected() {
        let client = LesClient::create(test_config());
        assert!(matches!(
            client.get_block_headers(1u64, 0, 0, false, |_| {}),
            Err(LesError::InvalidInput(_))
        ));
        assert!(matches!(
            client.get_block_bodies(vec![], |_, _| {}),
            Err(LesError::InvalidInput(_))
        ));
        assert!(matches!(
            client.get_transaction_status(vec![], |_, _| {}),
            Err(LesError::InvalidInput(_))
        ));
        // An unsigned transaction cannot be relayed.
        let tx = LegacyTransaction::default();
        assert!(matches!(
            client.submit_transaction(&tx, |_, _| {}),
            Err(LesError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn status_and_announce_callbacks_fire() {
        let statuses = Arc::new(StdMutex::new(Vec::new()));
        let announces = Arc::new(StdMutex::new(Vec::new()));

        let mut config = test_config();
        let status_sink = statuses.clone();
        config.status_callback = Some(Box::new(move |node_id, hash, number| {
            status_sink.lock().unwrap().push((node_id, hash, number));
        }));
        let announce_sink = announces.clone();
        config.announce_callback = Some(Box::new(move |node_id, announcement| {
            announce_sink
                .lock()
                .unwrap()
                .push((node_id, announcement.clone()));
        }));

        let client = LesClient::create(config);
        let node_id = attach_fake_peer(&client, fixture(), false).await;

        {
            let statuses = statuses.lock().unwrap();
            assert_eq!(statuses.len(), 1);
            assert_eq!(statuses[0].0, node_id);
            assert_eq!(statuses[0].2, 6_100_000);
        }

        let announcement = crate::rlpx::les::Announce {
            head_hash: h("204167e38efa1a4d75c996491637027bb1c8b1fe0d29e8d233160b5256cb415a"),
            head_number: 6_100_001,
            head_td: U256::from(0x5000001000u64),
            reorg_depth: 0,
        };
        client
            .events_sender()
            .send(NetEvent::Announced {
                node_id,
                announce: announcement,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let announces = announces.lock().unwrap();
        assert_eq!(announces.len(), 1);
        assert_eq!(announces[0].0, node_id);
        assert_eq!(announces[0].1.head_number, 6_100_001);
        assert_eq!(announces[0].1.reorg_depth, 0);
    }

    #[tokio::test]
    async fn save_nodes_fires_on_state_changes() {
        let saved = Arc::new(StdMutex::new(Vec::new()));

        // Pre-register the peer we are about to attach so the status
        // transition has a persisted record to update.
        let node_id = H512::from_low_u64_be(0xbeef);
        let known = NodeConfig {
            node: Node {
                ip: "127.0.0.1".parse().unwrap(),
                udp_port: 30303,
                tcp_port: 30303,
                node_id,
            },
            state: NodeState::Disconnected,
            priority: 0,
        };

        let mut config = test_config();
        config.known_nodes = vec![known];
        let sink = saved.clone();
        config.save_nodes_callback = Some(Box::new(move |nodes| {
            sink.lock().unwrap().push(nodes.to_vec());
        }));

        let client = LesClient::create(config);
        let (commands_tx, commands_rx) = mpsc::channel(64);
        client.attach_session(node_id, commands_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::spawn(run_fake_peer(
            node_id,
            fixture(),
            commands_rx,
            client.events_sender(),
            false,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].len(), 1);
        assert_eq!(saved[0][0].state, NodeState::Available);
    }
}
