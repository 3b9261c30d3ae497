//! Abstract peer/key lookup service (spec.md section 4.6), with two
//! interchangeable backends: a remote [`tracker`] and an in-process
//! [`dht`] table. Both implement [`PeerKeyStore`]; callers depend only on
//! the trait, selecting a backend from node configuration at startup.

pub mod dht;
pub mod tracker;

use async_trait::async_trait;
use std::net::IpAddr;
use syncr_core::crypto::{NodeId, PublicKey};
use syncr_core::error::SyncrResult;

/// One peer known to be hosting a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub ip: IpAddr,
    pub port: u16,
}

/// The lookup service contract (spec.md section 4.6): a key store plus a
/// peer store, over one namespace per implementation (tracker or DHT).
#[async_trait]
pub trait PeerKeyStore: Send + Sync {
    /// Publishes this node's public key under `node_id`.
    async fn set_key(&self, node_id: NodeId, public_key: &PublicKey) -> SyncrResult<()>;

    /// Resolves `node_id` to its public key, if known.
    async fn get_key(&self, node_id: NodeId) -> SyncrResult<Option<PublicKey>>;

    /// Announces that this node hosts `drop_id`, reachable at `peer`.
    async fn announce(&self, drop_id: &[u8], peer: PeerRecord) -> SyncrResult<()>;

    /// Lists the peers known to host `drop_id`.
    async fn lookup(&self, drop_id: &[u8]) -> SyncrResult<Vec<PeerRecord>>;
}
