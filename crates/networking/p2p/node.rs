use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::flow::FlowControl;
use crate::provisioner::{LesRequest, LesResponse, ProvisionerId, ResponseKind};
use crate::rlpx::connection::RLPxConnection;
use crate::rlpx::error::RLPxError;
use crate::rlpx::les::{Announce, StatusMessage};
use crate::rlpx::message::Message;
use crate::rlpx::p2p::{DisconnectMessage, PongMessage};
use crate::types::NodeId;

/// A peer is dropped after this many uninterrupted request timeouts.
pub(crate) const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Instructions from the manager to a node task.
#[derive(Debug)]
pub(crate) enum NodeCommand {
    Dispatch {
        provisioner_id: ProvisionerId,
        request: LesRequest,
    },
    Disconnect,
}

/// Why a dispatched slot failed on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchFailure {
    InsufficientCredit,
    Timeout,
    Mismatch,
    Disconnected,
}

/// Events a node task (or discovery) reports to the manager's mailbox. All
/// manager-owned state is mutated on the manager task only.
#[derive(Debug)]
pub(crate) enum NetEvent {
    StatusReceived {
        node_id: NodeId,
        status: StatusMessage,
    },
    Announced {
        node_id: NodeId,
        announce: Announce,
    },
    ResponseReceived {
        node_id: NodeId,
        provisioner_id: ProvisionerId,
        response: LesResponse,
    },
    DispatchFailed {
        node_id: NodeId,
        provisioner_id: ProvisionerId,
        failure: DispatchFailure,
    },
    PeerClosed {
        node_id: NodeId,
        errored: bool,
    },
    NewCandidate {
        node: crate::types::Node,
    },
}

struct Pending {
    provisioner_id: ProvisionerId,
    kind: ResponseKind,
    deadline: Instant,
}

/// One live peer session: owns the transport, the in-flight request table
/// and the credit budget. Everything else is reported upwards as events.
pub(crate) struct NodeSession<S> {
    node_id: NodeId,
    conn: RLPxConnection<S>,
    commands: mpsc::Receiver<NodeCommand>,
    events: mpsc::Sender<NetEvent>,
    our_status: StatusMessage,
    request_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> NodeSession<S> {
    pub fn new(
        node_id: NodeId,
        conn: RLPxConnection<S>,
        commands: mpsc::Receiver<NodeCommand>,
        events: mpsc::Sender<NetEvent>,
        our_status: StatusMessage,
        request_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            conn,
            commands,
            events,
            our_status,
            request_timeout,
        }
    }

    /// Drives the session to completion: RLPx handshake, Status exchange,
    /// then the request/response loop until disconnect or a fatal error.
    pub async fn run(mut self) {
        let status = match self.establish().await {
            Ok(status) => status,
            Err(error) => {
                debug!(node = %self.node_id, %error, "Session setup failed");
                let _ = self
                    .events
                    .send(NetEvent::PeerClosed {
                        node_id: self.node_id,
                        errored: true,
                    })
                    .await;
                return;
            }
        };

        let flow = FlowControl::from_status(&status);
        let _ = self
            .events
            .send(NetEvent::StatusReceived {
                node_id: self.node_id,
                status,
            })
            .await;

        let errored = self.message_loop(flow).await.is_err();
        let _ = self
            .events
            .send(NetEvent::PeerClosed {
                node_id: self.node_id,
                errored,
            })
            .await;
    }

    /// Transport handshake plus the one-time LES Status exchange.
    async fn establish(&mut self) -> Result<StatusMessage, RLPxError> {
        self.conn.handshake().await?;
        self.conn
            .send(Message::Status(self.our_status.clone()))
            .await?;
        match self.conn.receive().await? {
            Message::Status(status) => {
                status.ensure_compatible(&self.our_status)?;
                info!(node = %self.node_id, head = status.head_number, "LES session active");
                Ok(status)
            }
            Message::Disconnect(disconnect) => Err(RLPxError::HandshakeError(format!(
                "Peer disconnected before status (reason: {:?})",
                disconnect.reason
            ))),
            other => Err(RLPxError::HandshakeError(format!(
                "Expected Status, got {other}"
            ))),
        }
    }

    async fn message_loop(&mut self, mut flow: FlowControl) -> Result<(), RLPxError> {
        let mut inflight: HashMap<u64, Pending> = HashMap::new();
        let mut next_request_id: u64 = 1;
        let mut consecutive_timeouts: u32 = 0;

        loop {
            let next_deadline = inflight
                .values()
                .map(|pending| pending.deadline)
                .min()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(NodeCommand::Dispatch { provisioner_id, request }) => {
                        flow.recharge();
                        let cost = flow.max_cost(request.msg_code(), request.cost_units());
                        if !flow.reserve(cost) {
                            debug!(node = %self.node_id, cost, buffer = flow.buffer(),
                                "Request over budget, bouncing back");
                            let _ = self.events.send(NetEvent::DispatchFailed {
                                node_id: self.node_id,
                                provisioner_id,
                                failure: DispatchFailure::InsufficientCredit,
                            }).await;
                            continue;
                        }

                        let request_id = next_request_id;
                        next_request_id += 1;
                        inflight.insert(request_id, Pending {
                            provisioner_id,
                            kind: request.expected_kind(),
                            deadline: Instant::now() + self.request_timeout,
                        });
                        self.conn.send(request.to_message(request_id)).await?;
                    }
                    Some(NodeCommand::Disconnect) | None => {
                        let _ = self.conn.send(Message::Disconnect(
                            DisconnectMessage::new(Some(0x08)),
                        )).await;
                        self.fail_all(inflight, DispatchFailure::Disconnected).await;
                        return Ok(());
                    }
                },

                message = self.conn.receive() => match message? {
                    Message::Ping(_) => {
                        self.conn.send(Message::Pong(PongMessage::new())).await?;
                    }
                    Message::Pong(_) => {}
                    Message::Disconnect(disconnect) => {
                        debug!(node = %self.node_id, reason = ?disconnect.reason,
                            "Peer disconnected");
                        self.fail_all(inflight, DispatchFailure::Disconnected).await;
                        return Ok(());
                    }
                    Message::Announce(announce) => {
                        let _ = self.events.send(NetEvent::Announced {
                            node_id: self.node_id,
                            announce,
                        }).await;
                    }
                    Message::BlockHeaders(msg) => {
                        consecutive_timeouts = 0;
                        self.handle_response(
                            &mut inflight, &mut flow,
                            msg.id, msg.bv, LesResponse::Headers(msg.headers),
                        ).await;
                    }
                    Message::BlockBodies(msg) => {
                        consecutive_timeouts = 0;
                        self.handle_response(
                            &mut inflight, &mut flow,
                            msg.id, msg.bv, LesResponse::Bodies(msg.bodies),
                        ).await;
                    }
                    Message::Receipts(msg) => {
                        consecutive_timeouts = 0;
                        self.handle_response(
                            &mut inflight, &mut flow,
                            msg.id, msg.bv, LesResponse::Receipts(msg.receipts),
                        ).await;
                    }
                    Message::ProofsV2(msg) => {
                        consecutive_timeouts = 0;
                        self.handle_response(
                            &mut inflight, &mut flow,
                            msg.id, msg.bv, LesResponse::Proofs(msg.nodes),
                        ).await;
                    }
                    Message::HelperTrieProofs(msg) => {
                        consecutive_timeouts = 0;
                        self.handle_response(
                            &mut inflight, &mut flow,
                            msg.id, msg.bv, LesResponse::Proofs(msg.nodes),
                        ).await;
                    }
                    Message::TxStatus(msg) => {
                        consecutive_timeouts = 0;
                        self.handle_response(
                            &mut inflight, &mut flow,
                            msg.id, msg.bv, LesResponse::TxStatus(msg.statuses),
                        ).await;
                    }
                    Message::Status(_) => {
                        // Status is exchanged exactly once per session
                        return Err(RLPxError::StatusMismatch(
                            "Repeated status message".to_string(),
                        ));
                    }
                    other => {
                        // A client serves nothing; requests are ignored.
                        debug!(node = %self.node_id, message = %other, "Ignoring message");
                    }
                },

                _ = tokio::time::sleep_until(next_deadline), if !inflight.is_empty() => {
                    let now = Instant::now();
                    let expired: Vec<u64> = inflight
                        .iter()
                        .filter(|(_, pending)| pending.deadline <= now)
                        .map(|(id, _)| *id)
                        .collect();
                    for request_id in expired {
                        if let Some(pending) = inflight.remove(&request_id) {
                            warn!(node = %self.node_id, request_id, "Request timed out");
                            let _ = self.events.send(NetEvent::DispatchFailed {
                                node_id: self.node_id,
                                provisioner_id: pending.provisioner_id,
                                failure: DispatchFailure::Timeout,
                            }).await;
                        }
                    }
                    consecutive_timeouts += 1;
                    if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                        debug!(node = %self.node_id, "Too many timeouts, dropping peer");
                        let _ = self.conn.send(Message::Disconnect(
                            DisconnectMessage::new(Some(0x04)),
                        )).await;
                        self.fail_all(inflight, DispatchFailure::Disconnected).await;
                        return Err(RLPxError::ConnectionError(
                            "Peer timed out repeatedly".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Matches a response to its in-flight slot and forwards the payload.
    /// Unknown request ids are logged and dropped; they are not fatal.
    async fn handle_response(
        &mut self,
        inflight: &mut HashMap<u64, Pending>,
        flow: &mut FlowControl,
        request_id: u64,
        bv: u64,
        response: LesResponse,
    ) {
        flow.absorb_bv(bv);
        let Some(pending) = inflight.remove(&request_id) else {
            debug!(node = %self.node_id, request_id, "Response for unknown request id");
            return;
        };
        let event = if pending.kind == response.kind() {
            NetEvent::ResponseReceived {
                node_id: self.node_id,
                provisioner_id: pending.provisioner_id,
                response,
            }
        } else {
            NetEvent::DispatchFailed {
                node_id: self.node_id,
                provisioner_id: pending.provisioner_id,
                failure: DispatchFailure::Mismatch,
            }
        };
        let _ = self.events.send(event).await;
    }

    async fn fail_all(&mut self, inflight: HashMap<u64, Pending>, failure: DispatchFailure) {
        for (_, pending) in inflight {
            let _ = self
                .events
                .send(NetEvent::DispatchFailed {
                    node_id: self.node_id,
                    provisioner_id: pending.provisioner_id,
                    failure,
                })
                .await;
        }
    }
}
