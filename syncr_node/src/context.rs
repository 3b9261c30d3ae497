//! `NodeContext`: the init-once, lifecycle-scoped value that wires a
//! loaded identity, a selected peer/key store, local file storage, and the
//! drop registry into one running [`SyncEngine`] (spec.md section 9
//! "process-wide singletons" — an explicit context value rather than
//! global mutable state, matching the teacher's `S5Node`).

use std::sync::Arc;

use syncr_core::error::SyncrResult;
use syncr_lookup::PeerKeyStore;
use syncr_lookup::dht::DhtStore;
use syncr_lookup::tracker::TrackerClient;
use syncr_metadata::DropRegistry;
use syncr_store::{FileStore, LocalFileStore};
use syncr_sync::SyncEngine;

use crate::config::{LookupConfig, NodeConfig};
use crate::identity;

pub struct NodeContext {
    pub config: NodeConfig,
    pub engine: Arc<SyncEngine>,
}

impl NodeContext {
    /// Loads the node's private key, builds the configured peer/key store,
    /// publishes this node's public key to it, and constructs the engine.
    pub async fn init(config: NodeConfig) -> SyncrResult<Self> {
        let private_key = identity::load_private_key(&config.private_key_path())?;
        let public_key = private_key.public_key();
        let node_id = public_key.node_id()?;

        let peer_store: Arc<dyn PeerKeyStore> = match &config.lookup {
            LookupConfig::Tracker { ip, port } => Arc::new(TrackerClient::new(*ip, *port)),
            LookupConfig::Dht { .. } => Arc::new(DhtStore::default()),
        };
        peer_store.set_key(node_id, &public_key).await?;

        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        let registry = DropRegistry::new(config.drops_registry_dir());
        let engine = Arc::new(SyncEngine::new(private_key, store, peer_store, registry)?);

        Ok(NodeContext { config, engine })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use syncr_core::crypto::PrivateKey;

    fn sample_config(init_dir: std::path::PathBuf) -> NodeConfig {
        NodeConfig {
            init_dir,
            listen_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            advertise_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            lookup: LookupConfig::Dht {
                bootstrap_ips: Vec::new(),
                bootstrap_ports: Vec::new(),
                listen_port: 0,
            },
        }
    }

    #[tokio::test]
    async fn init_loads_key_and_builds_an_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let key = PrivateKey::generate().unwrap();
        std::fs::write(tmp.path().join("private_key"), key.to_pkcs8_der().unwrap()).unwrap();

        let context = NodeContext::init(sample_config(tmp.path().to_path_buf())).await.unwrap();
        assert_eq!(context.engine.node_id(), key.public_key().node_id().unwrap());
    }

    #[tokio::test]
    async fn init_fails_without_a_private_key() {
        let tmp = tempfile::tempdir().unwrap();
        let err = NodeContext::init(sample_config(tmp.path().to_path_buf())).await.unwrap_err();
        assert!(matches!(err, syncr_core::error::SyncrError::Io { .. }));
    }
}
