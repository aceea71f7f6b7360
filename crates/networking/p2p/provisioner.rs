use bytes::Bytes;
use etherlight_core::{
    types::{AccountState, BlockBody, BlockHash, BlockHeader, Receipt, TransactionStatus},
    Address, H256,
};
use etherlight_rlp::decode::RLPDecode;
use sha3::{Digest, Keccak256};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::LesError;
use crate::rlpx::les::blocks::{GetBlockBodies, GetBlockHeaders, HashOrNumber};
use crate::rlpx::les::proofs::{GetProofsV2, ProofRequest};
use crate::rlpx::les::receipts::GetReceipts;
use crate::rlpx::les::transactions::{GetTxStatus, SendTx2};
use crate::rlpx::message::Message;
use crate::types::NodeId;

pub type ProvisionerId = u64;

/// How many independent peers must answer before a request completes.
/// Everything the public API issues today is `SingleNode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    SingleNode,
    Quorum(usize),
}

impl DispatchPolicy {
    fn rounds(&self) -> usize {
        match self {
            DispatchPolicy::SingleNode => 1,
            DispatchPolicy::Quorum(k) => (*k).max(1),
        }
    }
}

/// A trie-proof query as seen by API callers. `key1` addresses the account
/// trie, `key2` the storage trie; an empty key is omitted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSpec {
    pub block_hash: BlockHash,
    pub key1: Bytes,
    pub key2: Bytes,
    pub from_level: u64,
}

/// One logical request, tracking only the units still missing. Retries
/// re-dispatch this same value, so partial progress narrows it in place.
#[derive(Debug, Clone)]
pub(crate) enum LesRequest {
    BlockHeaders {
        start: HashOrNumber,
        limit: u64,
        skip: u64,
        reverse: bool,
    },
    BlockBodies {
        hashes: Vec<BlockHash>,
    },
    Receipts {
        hashes: Vec<BlockHash>,
    },
    Proofs {
        specs: Vec<ProofSpec>,
    },
    AccountState {
        block_number: u64,
        block_hash: BlockHash,
        address: Address,
    },
    TxStatus {
        hashes: Vec<H256>,
    },
    SubmitTransaction {
        raw: Bytes,
        hash: H256,
    },
}

/// Message codes within the les capability, the keys of the MRC cost table.
mod code {
    pub const GET_BLOCK_HEADERS: u8 = 0x02;
    pub const GET_BLOCK_BODIES: u8 = 0x04;
    pub const GET_RECEIPTS: u8 = 0x06;
    pub const GET_PROOFS_V2: u8 = 0x0f;
    pub const SEND_TX_V2: u8 = 0x13;
    pub const GET_TX_STATUS: u8 = 0x14;
}

impl LesRequest {
    pub fn expected_units(&self) -> usize {
        match self {
            LesRequest::BlockHeaders { limit, .. } => *limit as usize,
            LesRequest::BlockBodies { hashes } => hashes.len(),
            LesRequest::Receipts { hashes } => hashes.len(),
            LesRequest::Proofs { specs } => specs.len(),
            LesRequest::AccountState { .. } => 1,
            LesRequest::TxStatus { hashes } => hashes.len(),
            LesRequest::SubmitTransaction { .. } => 1,
        }
    }

    pub fn msg_code(&self) -> u8 {
        match self {
            LesRequest::BlockHeaders { .. } => code::GET_BLOCK_HEADERS,
            LesRequest::BlockBodies { .. } => code::GET_BLOCK_BODIES,
            LesRequest::Receipts { .. } => code::GET_RECEIPTS,
            LesRequest::Proofs { .. } | LesRequest::AccountState { .. } => code::GET_PROOFS_V2,
            LesRequest::TxStatus { .. } => code::GET_TX_STATUS,
            LesRequest::SubmitTransaction { .. } => code::SEND_TX_V2,
        }
    }

    /// Unit count used for the flow-control cost estimate.
    pub fn cost_units(&self) -> u64 {
        self.expected_units() as u64
    }

    /// The highest block a peer must have to answer, when knowable. Peers
    /// whose advertised head is below this are not eligible.
    pub fn min_head(&self) -> Option<u64> {
        match self {
            LesRequest::BlockHeaders {
                start: HashOrNumber::Number(start),
                limit,
                skip,
                reverse,
            } => {
                if *reverse {
                    Some(*start)
                } else {
                    Some(start + (limit.saturating_sub(1)) * (skip + 1))
                }
            }
            LesRequest::AccountState { block_number, .. } => Some(*block_number),
            _ => None,
        }
    }

    /// Serializes the request under the given request id.
    pub fn to_message(&self, id: u64) -> Message {
        match self {
            LesRequest::BlockHeaders {
                start,
                limit,
                skip,
                reverse,
            } => Message::GetBlockHeaders(GetBlockHeaders::new(id, *start, *limit, *skip, *reverse)),
            LesRequest::BlockBodies { hashes } => {
                Message::GetBlockBodies(GetBlockBodies::new(id, hashes.clone()))
            }
            LesRequest::Receipts { hashes } => {
                Message::GetReceipts(GetReceipts::new(id, hashes.clone()))
            }
            LesRequest::Proofs { specs } => Message::GetProofsV2(GetProofsV2::new(
                id,
                specs
                    .iter()
                    .map(|spec| ProofRequest {
                        block_hash: spec.block_hash,
                        key1: spec.key1.clone(),
                        key2: spec.key2.clone(),
                        from_level: spec.from_level,
                    })
                    .collect(),
            )),
            LesRequest::AccountState {
                block_hash, address, ..
            } => Message::GetProofsV2(GetProofsV2::new(
                id,
                vec![ProofRequest {
                    block_hash: *block_hash,
                    key1: Bytes::copy_from_slice(&Keccak256::digest(address.as_bytes())),
                    key2: Bytes::new(),
                    from_level: 0,
                }],
            )),
            LesRequest::TxStatus { hashes } => {
                Message::GetTxStatus(GetTxStatus::new(id, hashes.clone()))
            }
            LesRequest::SubmitTransaction { raw, .. } => {
                Message::SendTx2(SendTx2::new(id, vec![raw.clone()]))
            }
        }
    }

    pub fn expected_kind(&self) -> ResponseKind {
        match self {
            LesRequest::BlockHeaders { .. } => ResponseKind::Headers,
            LesRequest::BlockBodies { .. } => ResponseKind::Bodies,
            LesRequest::Receipts { .. } => ResponseKind::Receipts,
            LesRequest::Proofs { .. } | LesRequest::AccountState { .. } => ResponseKind::Proofs,
            LesRequest::TxStatus { .. } | LesRequest::SubmitTransaction { .. } => {
                ResponseKind::TxStatus
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKind {
    Headers,
    Bodies,
    Receipts,
    Proofs,
    TxStatus,
}

/// A decoded response payload, already stripped of request id and BV.
#[derive(Debug, Clone)]
pub(crate) enum LesResponse {
    Headers(Vec<BlockHeader>),
    Bodies(Vec<BlockBody>),
    Receipts(Vec<Vec<Receipt>>),
    Proofs(Vec<Bytes>),
    TxStatus(Vec<TransactionStatus>),
}

impl LesResponse {
    pub fn kind(&self) -> ResponseKind {
        match self {
            LesResponse::Headers(_) => ResponseKind::Headers,
            LesResponse::Bodies(_) => ResponseKind::Bodies,
            LesResponse::Receipts(_) => ResponseKind::Receipts,
            LesResponse::Proofs(_) => ResponseKind::Proofs,
            LesResponse::TxStatus(_) => ResponseKind::TxStatus,
        }
    }
}

/// Per-unit delivery callbacks. The caller's context rides in the closure's
/// captured state.
pub(crate) enum LesCallback {
    Headers(Box<dyn FnMut(BlockHeader) + Send>),
    Bodies(Box<dyn FnMut(BlockHash, BlockBody) + Send>),
    Receipts(Box<dyn FnMut(BlockHash, Vec<Receipt>) + Send>),
    Proofs(Box<dyn FnMut(BlockHash, Vec<Bytes>) + Send>),
    AccountState(Box<dyn FnMut(AccountState) + Send>),
    TxStatus(Box<dyn FnMut(H256, TransactionStatus) + Send>),
}

impl std::fmt::Debug for LesCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LesCallback::Headers(_) => "Headers",
            LesCallback::Bodies(_) => "Bodies",
            LesCallback::Receipts(_) => "Receipts",
            LesCallback::Proofs(_) => "Proofs",
            LesCallback::AccountState(_) => "AccountState",
            LesCallback::TxStatus(_) => "TxStatus",
        };
        write!(f, "LesCallback::{name}")
    }
}

/// Awaitable completion of a logical request: resolves exactly once, either
/// after every expected unit was delivered or with the terminal error.
#[derive(Debug)]
pub struct CompletionHandle {
    receiver: oneshot::Receiver<Result<(), LesError>>,
}

impl CompletionHandle {
    pub async fn wait(self) -> Result<(), LesError> {
        self.receiver.await.unwrap_or(Err(LesError::Cancelled))
    }
}

/// What absorbing one response did to the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbsorbOutcome {
    /// All expected units (and quorum rounds) are satisfied.
    Complete,
    /// Some units were delivered; the narrowed request needs another slot.
    Progress,
    /// The response did not advance the request; count it as a failed
    /// dispatch and try another peer.
    Mismatch,
}

/// The assembly state of one logical request.
#[derive(Debug)]
pub(crate) struct Provisioner {
    pub id: ProvisionerId,
    pub request: LesRequest,
    pub attempts: usize,
    pub max_attempts: usize,
    pub deadline: Instant,
    pub in_flight_on: Option<NodeId>,
    pub last_failed_on: Option<NodeId>,
    callback: LesCallback,
    completion: Option<oneshot::Sender<Result<(), LesError>>>,
    delivered: usize,
    expected: usize,
    /// Original request, re-issued for quorum confirmation rounds.
    original: LesRequest,
    rounds_remaining: usize,
    /// Confirmation rounds run the request again without re-delivering.
    deliver: bool,
}

impl Provisioner {
    pub fn new(
        id: ProvisionerId,
        request: LesRequest,
        callback: LesCallback,
        policy: DispatchPolicy,
        deadline: Instant,
        max_attempts: usize,
    ) -> (Self, CompletionHandle) {
        let (sender, receiver) = oneshot::channel();
        let expected = request.expected_units();
        let provisioner = Self {
            id,
            original: request.clone(),
            request,
            attempts: 0,
            max_attempts,
            deadline,
            in_flight_on: None,
            last_failed_on: None,
            callback,
            completion: Some(sender),
            delivered: 0,
            expected,
            rounds_remaining: policy.rounds(),
            deliver: true,
        };
        (provisioner, CompletionHandle { receiver })
    }

    /// Fires the completion latch. Safe to call more than once; only the
    /// first call reaches the caller.
    pub fn complete(&mut self, result: Result<(), LesError>) {
        if let Some(sender) = self.completion.take() {
            let _ = sender.send(result);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_none()
    }

    /// Reconciles one response with the remaining units. Ordered payloads
    /// (headers) associate positionally and narrow the request window;
    /// keyed payloads (bodies, receipts) consume the hash list front-first,
    /// in request order.
    pub fn absorb(&mut self, response: LesResponse) -> AbsorbOutcome {
        let outcome = match (&mut self.request, response) {
            (
                LesRequest::BlockHeaders {
                    start,
                    limit,
                    skip,
                    reverse,
                },
                LesResponse::Headers(headers),
            ) => {
                if headers.is_empty() {
                    return AbsorbOutcome::Mismatch;
                }
                let take = headers.len().min(*limit as usize);
                if self.deliver {
                    if let LesCallback::Headers(callback) = &mut self.callback {
                        for header in &headers[..take] {
                            callback(header.clone());
                        }
                    }
                }
                self.delivered += take;
                if self.delivered >= self.expected {
                    AbsorbOutcome::Complete
                } else {
                    // Narrow the window to the units still missing.
                    let last = &headers[take - 1];
                    let step = *skip + 1;
                    let next = if *reverse {
                        match last.number.checked_sub(step) {
                            Some(next) => next,
                            None => return AbsorbOutcome::Mismatch,
                        }
                    } else {
                        last.number + step
                    };
                    *start = HashOrNumber::Number(next);
                    *limit -= take as u64;
                    AbsorbOutcome::Progress
                }
            }
            (LesRequest::BlockBodies { hashes }, LesResponse::Bodies(bodies)) => {
                if bodies.is_empty() {
                    return AbsorbOutcome::Mismatch;
                }
                let take = bodies.len().min(hashes.len());
                if self.deliver {
                    if let LesCallback::Bodies(callback) = &mut self.callback {
                        for (hash, body) in hashes.iter().zip(bodies.into_iter()) {
                            callback(*hash, body);
                        }
                    }
                }
                hashes.drain(..take);
                self.delivered += take;
                if hashes.is_empty() {
                    AbsorbOutcome::Complete
                } else {
                    AbsorbOutcome::Progress
                }
            }
            (LesRequest::Receipts { hashes }, LesResponse::Receipts(receipts)) => {
                if receipts.is_empty() {
                    return AbsorbOutcome::Mismatch;
                }
                let take = receipts.len().min(hashes.len());
                if self.deliver {
                    if let LesCallback::Receipts(callback) = &mut self.callback {
                        for (hash, block_receipts) in hashes.iter().zip(receipts.into_iter()) {
                            callback(*hash, block_receipts);
                        }
                    }
                }
                hashes.drain(..take);
                self.delivered += take;
                if hashes.is_empty() {
                    AbsorbOutcome::Complete
                } else {
                    AbsorbOutcome::Progress
                }
            }
            (LesRequest::Proofs { specs }, LesResponse::Proofs(nodes)) => {
                if self.deliver {
                    if let LesCallback::Proofs(callback) = &mut self.callback {
                        // A single merged node set answers the whole batch.
                        for spec in specs.iter() {
                            callback(spec.block_hash, nodes.clone());
                        }
                    }
                }
                self.delivered = self.expected;
                AbsorbOutcome::Complete
            }
            (LesRequest::AccountState { address, .. }, LesResponse::Proofs(nodes)) => {
                let Some(account) = account_from_proof(&nodes, *address) else {
                    return AbsorbOutcome::Mismatch;
                };
                if self.deliver {
                    if let LesCallback::AccountState(callback) = &mut self.callback {
                        callback(account);
                    }
                }
                self.delivered = self.expected;
                AbsorbOutcome::Complete
            }
            (LesRequest::TxStatus { hashes }, LesResponse::TxStatus(statuses)) => {
                if self.deliver {
                    if let LesCallback::TxStatus(callback) = &mut self.callback {
                        for (i, hash) in hashes.iter().enumerate() {
                            // Entries the server does not know come back
                            // short; report those as Unknown.
                            let status = statuses.get(i).cloned().unwrap_or_default();
                            callback(*hash, status);
                        }
                    }
                }
                self.delivered = self.expected;
                AbsorbOutcome::Complete
            }
            (LesRequest::SubmitTransaction { hash, .. }, LesResponse::TxStatus(statuses)) => {
                let status = match statuses.into_iter().next() {
                    // Acceptance without a status means the transaction is
                    // on its way to the pool.
                    None | Some(TransactionStatus::Unknown) => TransactionStatus::Pending,
                    Some(status) => status,
                };
                if self.deliver {
                    if let LesCallback::TxStatus(callback) = &mut self.callback {
                        callback(*hash, status);
                    }
                }
                self.delivered = self.expected;
                AbsorbOutcome::Complete
            }
            _ => AbsorbOutcome::Mismatch,
        };

        match outcome {
            AbsorbOutcome::Complete if self.rounds_remaining > 1 => {
                // Quorum: run the same request again against another peer,
                // without re-delivering units.
                self.rounds_remaining -= 1;
                self.deliver = false;
                self.delivered = 0;
                self.request = self.original.clone();
                AbsorbOutcome::Progress
            }
            other => other,
        }
    }
}

/// Digs the account record out of a merkle proof: the leaf node is a 2-item
/// list whose value is the RLP of the account state.
fn account_from_proof(nodes: &[Bytes], _address: Address) -> Option<AccountState> {
    let mut found = None;
    for node in nodes {
        let Ok((_path, value)) = <(Bytes, Bytes)>::decode(node) else {
            continue;
        };
        if let Ok(account) = AccountState::decode(&value) {
            found = Some(account);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherlight_rlp::encode::RLPEncode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            number,
            ..Default::default()
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn headers_deliver_in_wire_order_and_narrow_on_partial() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::BlockHeaders {
                start: HashOrNumber::Number(4_732_522),
                limit: 3,
                skip: 0,
                reverse: false,
            },
            LesCallback::Headers(Box::new(move |header| sink.lock().unwrap().push(header.number))),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );

        // First peer only returns two of the three headers.
        let outcome = provisioner.absorb(LesResponse::Headers(vec![
            header(4_732_522),
            header(4_732_523),
        ]));
        assert_eq!(outcome, AbsorbOutcome::Progress);
        match &provisioner.request {
            LesRequest::BlockHeaders { start, limit, .. } => {
                assert_eq!(*start, HashOrNumber::Number(4_732_524));
                assert_eq!(*limit, 1);
            }
            other => panic!("unexpected request {other:?}"),
        }

        let outcome = provisioner.absorb(LesResponse::Headers(vec![header(4_732_524)]));
        assert_eq!(outcome, AbsorbOutcome::Complete);
        assert_eq!(*seen.lock().unwrap(), vec![4_732_522, 4_732_523, 4_732_524]);
    }

    #[test]
    fn reverse_headers_narrow_downwards() {
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::BlockHeaders {
                start: HashOrNumber::Number(4_732_522),
                limit: 3,
                skip: 0,
                reverse: true,
            },
            LesCallback::Headers(Box::new(|_| {})),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );

        let outcome = provisioner.absorb(LesResponse::Headers(vec![header(4_732_522)]));
        assert_eq!(outcome, AbsorbOutcome::Progress);
        match &provisioner.request {
            LesRequest::BlockHeaders { start, .. } => {
                assert_eq!(*start, HashOrNumber::Number(4_732_521));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn empty_header_response_is_a_mismatch() {
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::BlockHeaders {
                start: HashOrNumber::Number(10),
                limit: 1,
                skip: 0,
                reverse: false,
            },
            LesCallback::Headers(Box::new(|_| {})),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );
        assert_eq!(
            provisioner.absorb(LesResponse::Headers(vec![])),
            AbsorbOutcome::Mismatch
        );
    }

    #[test]
    fn tx_status_fills_missing_entries_with_unknown() {
        let hashes = vec![H256::from_low_u64_be(1), H256::from_low_u64_be(2)];
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::TxStatus {
                hashes: hashes.clone(),
            },
            LesCallback::TxStatus(Box::new(move |hash, status| {
                sink.lock().unwrap().push((hash, status))
            })),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );

        let outcome = provisioner.absorb(LesResponse::TxStatus(vec![TransactionStatus::Included {
            block_hash: H256::from_low_u64_be(0xf16b),
            block_number: 5_202_375,
            tx_index: 39,
        }]));
        assert_eq!(outcome, AbsorbOutcome::Complete);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, hashes[0]);
        assert!(matches!(seen[0].1, TransactionStatus::Included { .. }));
        assert_eq!(seen[1].1, TransactionStatus::Unknown);
    }

    #[test]
    fn submit_reports_pending_on_bare_accept() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = counter.clone();
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::SubmitTransaction {
                raw: Bytes::from_static(&[0xf8, 0x01]),
                hash: H256::from_low_u64_be(7),
            },
            LesCallback::TxStatus(Box::new(move |_, status| {
                assert_eq!(status, TransactionStatus::Pending);
                sink.fetch_add(1, Ordering::SeqCst);
            })),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );
        assert_eq!(
            provisioner.absorb(LesResponse::TxStatus(vec![])),
            AbsorbOutcome::Complete
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn account_state_is_read_from_the_proof_leaf() {
        let account = AccountState {
            nonce: 3,
            ..Default::default()
        };
        let leaf = {
            let mut buf = vec![];
            (
                Bytes::from_static(&[0x20]),
                Bytes::from(account.encode_to_vec()),
            )
                .encode(&mut buf);
            Bytes::from(buf)
        };

        let counter = Arc::new(AtomicUsize::new(0));
        let sink = counter.clone();
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::AccountState {
                block_number: 5_503_921,
                block_hash: H256::from_low_u64_be(0x089a),
                address: Address::from_low_u64_be(0x49f4),
            },
            LesCallback::AccountState(Box::new(move |state| {
                assert_eq!(state.nonce, 3);
                sink.fetch_add(1, Ordering::SeqCst);
            })),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );

        assert_eq!(
            provisioner.absorb(LesResponse::Proofs(vec![leaf])),
            AbsorbOutcome::Complete
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // A proof without a decodable leaf does not complete the request.
        let (mut provisioner, _handle) = Provisioner::new(
            2,
            LesRequest::AccountState {
                block_number: 5_503_921,
                block_hash: H256::from_low_u64_be(0x089a),
                address: Address::from_low_u64_be(0x49f4),
            },
            LesCallback::AccountState(Box::new(|_| panic!("must not deliver"))),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );
        assert_eq!(
            provisioner.absorb(LesResponse::Proofs(vec![Bytes::from_static(b"junk")])),
            AbsorbOutcome::Mismatch
        );
    }

    #[test]
    fn quorum_reissues_without_redelivering() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = counter.clone();
        let (mut provisioner, _handle) = Provisioner::new(
            1,
            LesRequest::TxStatus {
                hashes: vec![H256::from_low_u64_be(1)],
            },
            LesCallback::TxStatus(Box::new(move |_, _| {
                sink.fetch_add(1, Ordering::SeqCst);
            })),
            DispatchPolicy::Quorum(2),
            deadline(),
            3,
        );

        let response = LesResponse::TxStatus(vec![TransactionStatus::Pending]);
        assert_eq!(provisioner.absorb(response.clone()), AbsorbOutcome::Progress);
        assert_eq!(provisioner.absorb(response), AbsorbOutcome::Complete);
        // The per-unit callback fired exactly once despite two rounds.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_fires_once() {
        let (mut provisioner, handle) = Provisioner::new(
            1,
            LesRequest::TxStatus {
                hashes: vec![H256::zero()],
            },
            LesCallback::TxStatus(Box::new(|_, _| {})),
            DispatchPolicy::SingleNode,
            deadline(),
            3,
        );
        provisioner.complete(Ok(()));
        provisioner.complete(Err(LesError::Cancelled));
        assert!(provisioner.is_completed());

        let result = futures_executor(handle.wait());
        assert_eq!(result, Ok(()));
    }

    fn futures_executor<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }
}
