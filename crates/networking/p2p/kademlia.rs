use etherlight_core::H256;

use crate::discv4::time_now_unix;
use crate::types::{node_id_hash, Node, NodeId};

pub const MAX_NODES_PER_BUCKET: usize = 16;
const NUMBER_OF_BUCKETS: usize = 256;
const MAX_NUMBER_OF_REPLACEMENTS: usize = 10;

/// Endpoints with no contact for this long are evicted from the pool.
pub const ENDPOINT_TTL_SECS: u64 = 12 * 60 * 60;

/// Computes the distance between two nodes according to the discv4 protocol
/// and returns the corresponding bucket number.
/// <https://github.com/ethereum/devp2p/blob/master/discv4.md#node-identities>
pub fn bucket_number(node_id_1: NodeId, node_id_2: NodeId) -> usize {
    let hash_1 = node_id_hash(node_id_1);
    let hash_2 = node_id_hash(node_id_2);
    let xor = hash_1 ^ hash_2;
    let distance = U256_leading_bit(xor);
    distance.saturating_sub(1)
}

#[allow(non_snake_case)]
fn U256_leading_bit(xor: H256) -> usize {
    let mut distance = 0;
    for (i, byte) in xor.0.iter().enumerate() {
        if *byte != 0 {
            distance = 8 * (32 - i) - (byte.leading_zeros() as usize);
            break;
        }
    }
    distance
}

#[derive(Debug, Clone)]
pub struct PeerData {
    pub node: Node,
    /// How many consecutive revalidations the peer has answered.
    pub liveness: u16,
    pub last_ping: u64,
    pub last_pong: u64,
    pub last_ping_hash: Option<H256>,
    /// Whether the endpoint proof (our ping, their pong) has completed.
    pub is_proven: bool,
    /// Outcome of the revalidation ping in flight, if any.
    pub revalidation: Option<bool>,
}

impl PeerData {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            liveness: 0,
            last_ping: 0,
            last_pong: 0,
            last_ping_hash: None,
            is_proven: false,
            revalidation: None,
        }
    }

    pub fn increment_liveness(&mut self) {
        self.liveness += 1;
    }

    pub fn decrement_liveness(&mut self) {
        self.liveness /= 3;
    }

    pub fn is_stale(&self, now: u64, ttl: u64) -> bool {
        let last_contact = self.last_pong.max(self.last_ping);
        self.is_proven && now.saturating_sub(last_contact) > ttl
    }
}

#[derive(Debug, Default)]
pub struct Bucket {
    pub peers: Vec<PeerData>,
    pub replacements: Vec<PeerData>,
}

/// The discovery peer pool: 256 distance-indexed buckets of at most 16
/// peers, each with a small replacements list.
#[derive(Debug)]
pub struct KademliaTable {
    local_node_id: NodeId,
    buckets: Vec<Bucket>,
}

impl KademliaTable {
    pub fn new(local_node_id: NodeId) -> Self {
        let buckets = (0..NUMBER_OF_BUCKETS).map(|_| Bucket::default()).collect();
        Self {
            local_node_id,
            buckets,
        }
    }

    pub fn get_by_node_id(&self, node_id: NodeId) -> Option<&PeerData> {
        let bucket = &self.buckets[bucket_number(node_id, self.local_node_id)];
        bucket
            .peers
            .iter()
            .find(|entry| entry.node.node_id == node_id)
    }

    pub fn get_by_node_id_mut(&mut self, node_id: NodeId) -> Option<&mut PeerData> {
        let bucket = &mut self.buckets[bucket_number(node_id, self.local_node_id)];
        bucket
            .peers
            .iter_mut()
            .find(|entry| entry.node.node_id == node_id)
    }

    /// Returns the peer in the table (if it was inserted or already known)
    /// and whether the node was newly inserted. A full bucket pushes the node
    /// into the replacements list instead.
    pub fn insert_node(&mut self, node: Node) -> (Option<PeerData>, bool) {
        if node.node_id == self.local_node_id {
            return (None, false);
        }
        let bucket_idx = bucket_number(node.node_id, self.local_node_id);
        let bucket = &mut self.buckets[bucket_idx];
        if let Some(existing) = bucket
            .peers
            .iter()
            .find(|entry| entry.node.node_id == node.node_id)
        {
            return (Some(existing.clone()), false);
        }

        let peer = PeerData::new(node);
        if bucket.peers.len() < MAX_NODES_PER_BUCKET {
            bucket.peers.push(peer.clone());
            return (Some(peer), true);
        }

        // Bucket full: remember the node as a replacement candidate.
        if bucket
            .replacements
            .iter()
            .all(|entry| entry.node.node_id != node.node_id)
        {
            if bucket.replacements.len() >= MAX_NUMBER_OF_REPLACEMENTS {
                bucket.replacements.remove(0);
            }
            bucket.replacements.push(peer);
        }
        (None, false)
    }

    pub fn update_peer_ping(&mut self, node_id: NodeId, ping_hash: Option<H256>) {
        if let Some(peer) = self.get_by_node_id_mut(node_id) {
            peer.last_ping_hash = ping_hash;
            peer.last_ping = time_now_unix();
        }
    }

    pub fn update_peer_ping_with_revalidation(&mut self, node_id: NodeId, ping_hash: Option<H256>) {
        if let Some(peer) = self.get_by_node_id_mut(node_id) {
            peer.last_ping_hash = ping_hash;
            peer.last_ping = time_now_unix();
            peer.revalidation = Some(false);
        }
    }

    /// Marks the endpoint proof as completed for the peer.
    pub fn pong_answered(&mut self, node_id: NodeId) {
        if let Some(peer) = self.get_by_node_id_mut(node_id) {
            peer.is_proven = true;
            peer.last_pong = time_now_unix();
            peer.last_ping_hash = None;
            if peer.revalidation.is_some() {
                peer.revalidation = Some(true);
            }
        }
    }

    /// Removes a peer and promotes the oldest replacement into its slot.
    /// Returns the promoted peer, if any.
    pub fn replace_peer(&mut self, node_id: NodeId) -> Option<PeerData> {
        let bucket_idx = bucket_number(node_id, self.local_node_id);
        let bucket = &mut self.buckets[bucket_idx];
        bucket.peers.retain(|entry| entry.node.node_id != node_id);
        if bucket.replacements.is_empty() {
            return None;
        }
        let replacement = bucket.replacements.remove(0);
        bucket.peers.push(replacement.clone());
        Some(replacement)
    }

    pub fn get_least_recently_pinged_peers(&self, limit: usize) -> Vec<PeerData> {
        let mut peers: Vec<PeerData> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.peers.iter().cloned())
            .collect();
        peers.sort_by_key(|peer| peer.last_ping);
        peers.truncate(limit);
        peers
    }

    /// The proven peers closest to the target, at most a bucket's worth.
    pub fn get_closest_nodes(&self, target: NodeId) -> Vec<Node> {
        let mut scored: Vec<(usize, Node)> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.peers.iter())
            .map(|peer| (bucket_number(target, peer.node.node_id), peer.node))
            .collect();
        scored.sort_by_key(|(distance, _)| *distance);
        scored
            .into_iter()
            .map(|(_, node)| node)
            .take(MAX_NODES_PER_BUCKET)
            .collect()
    }

    /// Proven peers with a TCP endpoint, the dial candidates.
    pub fn connectable_peers(&self) -> Vec<Node> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.peers.iter())
            .filter(|peer| peer.is_proven && peer.node.tcp_port != 0)
            .map(|peer| peer.node)
            .collect()
    }

    /// Drops proven peers whose endpoints have gone stale.
    pub fn evict_stale(&mut self, ttl: u64) -> usize {
        let now = time_now_unix();
        let mut evicted = 0;
        for bucket in &mut self.buckets {
            let before = bucket.peers.len();
            bucket.peers.retain(|peer| !peer.is_stale(now, ttl));
            evicted += before - bucket.peers.len();
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherlight_core::H512;
    use std::net::{IpAddr, Ipv4Addr};

    fn node(id: u64) -> Node {
        Node {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            udp_port: 30303,
            tcp_port: 30303,
            node_id: H512::from_low_u64_be(id),
        }
    }

    #[test]
    fn insert_and_lookup() {
        let mut table = KademliaTable::new(H512::from_low_u64_be(1));
        let (peer, inserted) = table.insert_node(node(2));
        assert!(inserted);
        assert!(peer.is_some());

        // Reinsertion is a no-op
        let (peer, inserted) = table.insert_node(node(2));
        assert!(!inserted);
        assert!(peer.is_some());

        assert!(table.get_by_node_id(node(2).node_id).is_some());
        assert!(table.get_by_node_id(node(3).node_id).is_none());
    }

    #[test]
    fn own_node_is_never_inserted() {
        let local = H512::from_low_u64_be(1);
        let mut table = KademliaTable::new(local);
        let mut own = node(0);
        own.node_id = local;
        let (peer, inserted) = table.insert_node(own);
        assert!(!inserted);
        assert!(peer.is_none());
    }

    #[test]
    fn full_bucket_uses_replacements() {
        let local = H512::from_low_u64_be(1);
        let mut table = KademliaTable::new(local);

        let mut on_bucket = vec![];
        let mut replacement_candidate = None;
        let mut i = 2u64;
        // Fill one bucket completely, then overflow it by one.
        while replacement_candidate.is_none() {
            let candidate = node(i);
            let bucket_idx = bucket_number(candidate.node_id, local);
            if on_bucket.is_empty()
                || bucket_idx == bucket_number(on_bucket[0], local) {
                let (_, inserted) = table.insert_node(candidate);
                if inserted {
                    on_bucket.push(candidate.node_id);
                } else if on_bucket.len() == MAX_NODES_PER_BUCKET {
                    replacement_candidate = Some(candidate);
                }
            }
            i += 1;
        }

        // Evicting a peer promotes the replacement.
        let evicted = on_bucket[0];
        let promoted = table.replace_peer(evicted).unwrap();
        assert_eq!(
            promoted.node.node_id,
            replacement_candidate.unwrap().node_id
        );
        assert!(table.get_by_node_id(evicted).is_none());
    }

    #[test]
    fn stale_peers_are_evicted() {
        let mut table = KademliaTable::new(H512::from_low_u64_be(1));
        table.insert_node(node(2));
        table.update_peer_ping(node(2).node_id, None);
        table.pong_answered(node(2).node_id);

        assert_eq!(table.evict_stale(ENDPOINT_TTL_SECS), 0);
        // A zero TTL makes every proven contact stale... as long as a second
        // has passed, so backdate the contact instead.
        table.get_by_node_id_mut(node(2).node_id).unwrap().last_pong = 1;
        table.get_by_node_id_mut(node(2).node_id).unwrap().last_ping = 1;
        assert_eq!(table.evict_stale(ENDPOINT_TTL_SECS), 1);
        assert!(table.get_by_node_id(node(2).node_id).is_none());
    }

    #[test]
    fn closest_nodes_are_sorted_by_distance() {
        let local = H512::from_low_u64_be(1);
        let mut table = KademliaTable::new(local);
        for i in 2..40u64 {
            table.insert_node(node(i));
        }
        let target = node(2).node_id;
        let closest = table.get_closest_nodes(target);
        assert!(!closest.is_empty());
        assert!(closest.len() <= MAX_NODES_PER_BUCKET);
        assert_eq!(closest[0].node_id, target);
    }
}
