use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::try_join;
use tracing::{debug, info, warn};

use crate::bootnode::BootNode;
use crate::discv4::{
    get_expiration, is_expired, FindNodeMessage, Message, NeighborsMessage, Packet, PingMessage,
    PongMessage,
};
use crate::kademlia::{KademliaTable, ENDPOINT_TTL_SECS, MAX_NODES_PER_BUCKET};
use crate::node::NetEvent;
use crate::types::{Endpoint, Node, NodeId};
use crate::MAX_DISC_PACKET_SIZE;

const REVALIDATION_INTERVAL_IN_SECONDS: u64 = 30;
const LOOKUP_INTERVAL_IN_SECONDS: u64 = 60;
/// How many peers a revalidation round pings.
const REVALIDATION_FANOUT: usize = 3;
/// How many peers each lookup round queries.
const LOOKUP_ALPHA: usize = 3;

pub(crate) fn node_id_from_signing_key(signer: &SigningKey) -> NodeId {
    let public_key = PublicKey::from(signer.verifying_key());
    let encoded = public_key.to_encoded_point(false);
    NodeId::from_slice(&encoded.as_bytes()[1..])
}

/// Runs discovery until the socket dies: a packet server, a periodic
/// revalidator and a periodic lookup. Freshly proven peers are reported to
/// the manager mailbox as dial candidates.
pub(crate) async fn discover_peers(
    udp_addr: SocketAddr,
    signer: SigningKey,
    bootnodes: Vec<BootNode>,
    events: mpsc::Sender<NetEvent>,
) {
    let udp_socket = match UdpSocket::bind(udp_addr).await {
        Ok(socket) => Arc::new(socket),
        Err(error) => {
            warn!(%udp_addr, %error, "Could not bind discovery socket");
            return;
        }
    };
    let local_addr = udp_socket.local_addr().unwrap_or(udp_addr);
    info!(%local_addr, "Discovery listening");

    let local_node_id = node_id_from_signing_key(&signer);
    let table = Arc::new(Mutex::new(KademliaTable::new(local_node_id)));

    let server_handle = tokio::spawn(discovery_server(
        local_addr,
        udp_socket.clone(),
        table.clone(),
        signer.clone(),
        events,
    ));
    let revalidation_handle = tokio::spawn(peers_revalidation(
        local_addr,
        udp_socket.clone(),
        table.clone(),
        signer.clone(),
        REVALIDATION_INTERVAL_IN_SECONDS,
    ));
    let lookup_handle = tokio::spawn(peers_lookup(
        udp_socket.clone(),
        table.clone(),
        signer.clone(),
        LOOKUP_INTERVAL_IN_SECONDS,
    ));

    bootstrap(local_addr, &udp_socket, &table, &signer, bootnodes).await;

    let _ = try_join!(server_handle, revalidation_handle, lookup_handle);
}

/// Seeds the table with the bootstrap list and pings each entry for an
/// endpoint proof.
async fn bootstrap(
    local_addr: SocketAddr,
    udp_socket: &UdpSocket,
    table: &Mutex<KademliaTable>,
    signer: &SigningKey,
    bootnodes: Vec<BootNode>,
) {
    for bootnode in bootnodes {
        table.lock().await.insert_node(Node {
            ip: bootnode.socket_address.ip(),
            udp_port: bootnode.socket_address.port(),
            // enode urls serve RLPx on the same port
            tcp_port: bootnode.socket_address.port(),
            node_id: bootnode.node_id,
        });
        let ping_hash = ping(udp_socket, local_addr, bootnode.socket_address, signer).await;
        table
            .lock()
            .await
            .update_peer_ping(bootnode.node_id, ping_hash);
    }
}

async fn discovery_server(
    local_addr: SocketAddr,
    udp_socket: Arc<UdpSocket>,
    table: Arc<Mutex<KademliaTable>>,
    signer: SigningKey,
    events: mpsc::Sender<NetEvent>,
) {
    let mut buf = vec![0; MAX_DISC_PACKET_SIZE];

    loop {
        let (read, from) = match udp_socket.recv_from(&mut buf).await {
            Ok(result) => result,
            Err(error) => {
                warn!(%error, "Discovery socket read failed");
                return;
            }
        };

        // Packets with a bad hash or signature are dropped silently.
        let packet = match Packet::decode(&buf[..read]) {
            Ok(packet) => packet,
            Err(error) => {
                debug!(%from, ?error, "Discarding invalid discovery packet");
                continue;
            }
        };

        match packet.get_message() {
            Message::Ping(msg) => {
                if is_expired(msg.expiration) {
                    debug!("Ignoring ping as it is expired.");
                    continue;
                };
                let ping_hash = packet.get_hash();
                pong(&udp_socket, from, ping_hash, &signer).await;
                let node = {
                    let table = table.lock().await;
                    table.get_by_node_id(packet.get_node_id()).cloned()
                };
                if node.is_none() {
                    // Unknown peer: remember it and get our own endpoint
                    // proof under way.
                    let tcp_port = msg.from.tcp_port;
                    let (peer, inserted) = {
                        let mut table = table.lock().await;
                        table.insert_node(Node {
                            ip: from.ip(),
                            udp_port: from.port(),
                            tcp_port,
                            node_id: packet.get_node_id(),
                        })
                    };
                    if inserted && peer.is_some() {
                        let hash = ping(&udp_socket, local_addr, from, &signer).await;
                        table
                            .lock()
                            .await
                            .update_peer_ping(packet.get_node_id(), hash);
                    }
                }
            }
            Message::Pong(msg) => {
                if is_expired(msg.expiration) {
                    debug!("Ignoring pong as it is expired.");
                    continue;
                }
                let peer = {
                    let table = table.lock().await;
                    table.get_by_node_id(packet.get_node_id()).cloned()
                };
                let Some(peer) = peer else {
                    debug!("Discarding pong as it is not a known node");
                    continue;
                };
                match peer.last_ping_hash {
                    Some(hash) if hash == msg.ping_hash => {
                        let newly_proven = !peer.is_proven;
                        table.lock().await.pong_answered(peer.node.node_id);
                        if newly_proven && peer.node.tcp_port != 0 {
                            let _ = events
                                .send(NetEvent::NewCandidate { node: peer.node })
                                .await;
                        }
                    }
                    Some(_) => {
                        debug!("Discarding pong as the hash did not match the last ping")
                    }
                    None => debug!("Discarding pong as the node did not send a previous ping"),
                }
            }
            Message::FindNode(msg) => {
                if is_expired(msg.expiration) {
                    debug!("Ignoring find node msg as it is expired.");
                    continue;
                };
                let node = {
                    let table = table.lock().await;
                    table.get_by_node_id(packet.get_node_id()).cloned()
                };
                let Some(node) = node else {
                    debug!("Ignoring find node message as it is not a known node");
                    continue;
                };
                if !node.is_proven {
                    debug!("Ignoring find node message as the node isn't proven");
                    continue;
                }
                let nodes = {
                    let table = table.lock().await;
                    table.get_closest_nodes(msg.target)
                };
                let expiration = get_expiration(20);
                // Four nodes per datagram keeps packets under the limit.
                for chunk in nodes.chunks(4) {
                    let neighbors =
                        Message::Neighbors(NeighborsMessage::new(chunk.to_vec(), expiration));
                    let mut buf = Vec::new();
                    neighbors.encode_with_header(&mut buf, &signer);
                    if let Err(error) = udp_socket.send_to(&buf, from).await {
                        debug!(%error, "Could not send neighbors");
                        break;
                    }
                }
            }
            Message::Neighbors(msg) => {
                if is_expired(msg.expiration) {
                    debug!("Ignoring neighbor msg as it is expired.");
                    continue;
                };
                let known = {
                    let table = table.lock().await;
                    table.get_by_node_id(packet.get_node_id()).is_some()
                };
                if !known {
                    debug!("Ignoring neighbor msg as it is not a known node");
                    continue;
                }
                for node in msg.nodes.iter().take(MAX_NODES_PER_BUCKET) {
                    let (peer, inserted) = table.lock().await.insert_node(*node);
                    if inserted && peer.is_some() {
                        let hash = ping(&udp_socket, local_addr, node.udp_address(), &signer).await;
                        table.lock().await.update_peer_ping(node.node_id, hash);
                    }
                }
            }
        }
    }
}

/// Periodically pings the least recently contacted peers:
/// 1. Every round, ping up to [`REVALIDATION_FANOUT`] peers.
/// 2. The next round scores the previous pings: answered peers gain
///    liveness, silent ones lose it.
/// 3. Peers that reach zero liveness are replaced from the bucket's
///    replacements list; stale endpoints are evicted outright.
async fn peers_revalidation(
    local_addr: SocketAddr,
    udp_socket: Arc<UdpSocket>,
    table: Arc<Mutex<KademliaTable>>,
    signer: SigningKey,
    interval_seconds: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    let mut previously_pinged: Vec<NodeId> = Vec::new();

    // first tick starts immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        debug!("Running peer revalidation");

        for node_id in previously_pinged.drain(..) {
            let mut table = table.lock().await;
            let Some(peer) = table.get_by_node_id_mut(node_id) else {
                continue;
            };
            if let Some(has_answered) = peer.revalidation {
                if has_answered {
                    peer.increment_liveness();
                } else {
                    peer.decrement_liveness();
                }
            }
            peer.revalidation = None;

            if peer.liveness == 0 {
                let replacement = table.replace_peer(node_id);
                if let Some(replacement) = replacement {
                    let hash = ping(
                        &udp_socket,
                        local_addr,
                        replacement.node.udp_address(),
                        &signer,
                    )
                    .await;
                    table.update_peer_ping(replacement.node.node_id, hash);
                }
            }
        }

        table.lock().await.evict_stale(ENDPOINT_TTL_SECS);

        let peers = table
            .lock()
            .await
            .get_least_recently_pinged_peers(REVALIDATION_FANOUT);
        for peer in peers {
            let hash = ping(&udp_socket, local_addr, peer.node.udp_address(), &signer).await;
            table
                .lock()
                .await
                .update_peer_ping_with_revalidation(peer.node.node_id, hash);
            previously_pinged.push(peer.node.node_id);

            debug!(node = %peer.node.node_id, "Pinging peer to re-validate");
        }

        debug!("Peer revalidation finished");
    }
}

/// Periodically asks a few proven peers for nodes close to a random target,
/// growing the candidate pool beyond the bootstrap list.
async fn peers_lookup(
    udp_socket: Arc<UdpSocket>,
    table: Arc<Mutex<KademliaTable>>,
    signer: SigningKey,
    interval_seconds: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        debug!("Starting lookup");

        let target = node_id_from_signing_key(&SigningKey::random(&mut rand::rngs::OsRng));
        let peers: Vec<Node> = {
            let table = table.lock().await;
            table.connectable_peers()
        };
        for peer in peers.iter().take(LOOKUP_ALPHA) {
            let msg = Message::FindNode(FindNodeMessage::new(target, get_expiration(20)));
            let mut buf = Vec::new();
            msg.encode_with_header(&mut buf, &signer);
            let _ = udp_socket.send_to(&buf, peer.udp_address()).await;
        }

        debug!("Lookup finished");
    }
}

/// Sends a ping to the addr.
/// # Returns
/// an optional hash corresponding to the message header hash to account if
/// the send was successful.
async fn ping(
    socket: &UdpSocket,
    local_addr: SocketAddr,
    to_addr: SocketAddr,
    signer: &SigningKey,
) -> Option<etherlight_core::H256> {
    let mut buf = Vec::new();
    let expiration = get_expiration(20);

    let from = Endpoint {
        ip: local_addr.ip(),
        udp_port: local_addr.port(),
        tcp_port: 0,
    };
    let to = Endpoint {
        ip: to_addr.ip(),
        udp_port: to_addr.port(),
        tcp_port: 0,
    };

    let ping = Message::Ping(PingMessage::new(from, to, expiration));
    ping.encode_with_header(&mut buf, signer);
    let sent = socket.send_to(&buf, to_addr).await.ok()?;

    // sanity check to make sure the ping was well sent
    (sent == buf.len()).then(|| etherlight_core::H256::from_slice(&buf[0..32]))
}

async fn pong(
    socket: &UdpSocket,
    to_addr: SocketAddr,
    ping_hash: etherlight_core::H256,
    signer: &SigningKey,
) {
    let mut buf = Vec::new();
    let expiration = get_expiration(20);

    let to = Endpoint {
        ip: to_addr.ip(),
        udp_port: to_addr.port(),
        tcp_port: 0,
    };
    let pong = Message::Pong(PongMessage::new(to, ping_hash, expiration));

    pong.encode_with_header(&mut buf, signer);
    let _ = socket.send_to(&buf, to_addr).await;
}
