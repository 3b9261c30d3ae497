//! The DHT backend (spec.md section 4.6 "Distributed hash table
//! backend"): a Kademlia-shaped table keyed by drop ID or node ID, with
//! lazily-culled, TTL-bound peer announcements.
//!
//! Grounded on `original_source`'s `DropPeerDHTStorage`: entries carry an
//! insertion timestamp, announcements are unioned rather than replaced,
//! and culling happens on access rather than on a timer. The clamp
//! `entry.ts < now` from the original is preserved unchanged (an entry
//! timestamped in the future, which should never happen on a correctly
//! behaving node, is treated as expired rather than trusted).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use syncr_core::crypto::{NodeId, PublicKey};
use syncr_core::error::SyncrResult;

use crate::{PeerKeyStore, PeerRecord};

/// Default time-to-live for a peer announcement (spec.md section 6
/// "Tunables": `tracker_drop_availability_ttl=300s`).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<T> {
    inserted_at: Instant,
    value: T,
}

/// An in-process Kademlia-style table. A real deployment distributes this
/// storage across bootstrap peers; this implementation holds the contract
/// (union-merge, lazy TTL culling) that either a local node's own table or
/// a remote DHT client sits behind.
pub struct DhtStore {
    ttl: Duration,
    keys: Mutex<HashMap<NodeId, Entry<PublicKey>>>,
    peers: Mutex<HashMap<Vec<u8>, Vec<Entry<PeerRecord>>>>,
}

impl DhtStore {
    pub fn new(ttl: Duration) -> Self {
        DhtStore {
            ttl,
            keys: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Retains only entries younger than `ttl` whose timestamp is not in
    /// the future (the clamp from `original_source`'s `cull_entry`).
    fn cull<T>(entries: &mut Vec<Entry<T>>, ttl: Duration) {
        let now = Instant::now();
        entries.retain(|e| e.inserted_at + ttl > now && e.inserted_at <= now);
    }
}

impl Default for DhtStore {
    fn default() -> Self {
        DhtStore::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl PeerKeyStore for DhtStore {
    async fn set_key(&self, node_id: NodeId, public_key: &PublicKey) -> SyncrResult<()> {
        self.keys.lock().unwrap().insert(
            node_id,
            Entry {
                inserted_at: Instant::now(),
                value: public_key.clone(),
            },
        );
        Ok(())
    }

    async fn get_key(&self, node_id: NodeId) -> SyncrResult<Option<PublicKey>> {
        let mut keys = self.keys.lock().unwrap();
        if let Some(entry) = keys.get(&node_id) {
            let now = Instant::now();
            if entry.inserted_at + self.ttl > now && entry.inserted_at <= now {
                return Ok(Some(entry.value.clone()));
            }
            keys.remove(&node_id);
        }
        Ok(None)
    }

    async fn announce(&self, drop_id: &[u8], peer: PeerRecord) -> SyncrResult<()> {
        let mut peers = self.peers.lock().unwrap();
        let entries = peers.entry(drop_id.to_vec()).or_default();
        Self::cull(entries, self.ttl);
        // Union-merge: replace an existing entry for the same peer rather
        // than accumulating duplicates, but otherwise keep every peer
        // previously announced for this drop.
        entries.retain(|e| e.value != peer);
        entries.push(Entry {
            inserted_at: Instant::now(),
            value: peer,
        });
        Ok(())
    }

    async fn lookup(&self, drop_id: &[u8]) -> SyncrResult<Vec<PeerRecord>> {
        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(drop_id) {
            Some(entries) => {
                Self::cull(entries, self.ttl);
                Ok(entries.iter().map(|e| e.value).collect())
            }
            None => Ok(Vec::new()),
        }
    }
}

/// How often a node re-announces each locally-hosted drop so its entries
/// outlive the TTL (spec.md section 4.6: "roughly every TTL/2 seconds").
/// One second is shaved off to keep re-announcement strictly inside the
/// TTL window even under scheduling jitter.
pub fn reannounce_interval(ttl: Duration) -> Duration {
    let half = ttl / 2;
    half.saturating_sub(Duration::from_secs(1)).max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_peer(byte: u8) -> PeerRecord {
        PeerRecord {
            node_id: [byte; 32],
            ip: "127.0.0.1".parse().unwrap(),
            port: 4000 + byte as u16,
        }
    }

    #[tokio::test]
    async fn announce_then_lookup_round_trips() {
        let store = DhtStore::new(DEFAULT_TTL);
        let drop_id = vec![1u8; 64];
        store.announce(&drop_id, sample_peer(1)).await.unwrap();
        store.announce(&drop_id, sample_peer(2)).await.unwrap();

        let mut peers = store.lookup(&drop_id).await.unwrap();
        peers.sort_by_key(|p| p.node_id);
        assert_eq!(peers, vec![sample_peer(1), sample_peer(2)]);
    }

    #[tokio::test]
    async fn announce_of_same_peer_does_not_duplicate() {
        let store = DhtStore::new(DEFAULT_TTL);
        let drop_id = vec![1u8; 64];
        store.announce(&drop_id, sample_peer(1)).await.unwrap();
        store.announce(&drop_id, sample_peer(1)).await.unwrap();

        let peers = store.lookup(&drop_id).await.unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_culled_on_access() {
        let store = DhtStore::new(Duration::from_millis(20));
        let drop_id = vec![1u8; 64];
        store.announce(&drop_id, sample_peer(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let peers = store.lookup(&drop_id).await.unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn set_key_then_get_key_round_trips() {
        let store = DhtStore::new(DEFAULT_TTL);
        let key = syncr_core::crypto::PrivateKey::generate().unwrap().public_key();
        let node_id = key.node_id().unwrap();
        store.set_key(node_id, &key).await.unwrap();

        let resolved = store.get_key(node_id).await.unwrap();
        assert!(resolved.is_some());
    }

    #[test]
    fn reannounce_interval_is_roughly_half_ttl_minus_one_second() {
        assert_eq!(reannounce_interval(Duration::from_secs(300)), Duration::from_secs(149));
    }
}
