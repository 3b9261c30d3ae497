//! Per-node configuration (spec.md section 6 "Configuration"):
//! serde-derived, `{ "type": ... }`-tagged backend selection, matching the
//! teacher's `S5NodeConfig` shape.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use syncr_core::error::{SyncrError, SyncrResult};

/// The full configuration for one running node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The node's init directory (spec.md section 6: private key, peer/key
    /// store config, and the `drops/` registry all live under here).
    /// Defaults to `~/.5yncr`.
    #[serde(default = "default_init_dir")]
    pub init_dir: PathBuf,

    /// Address the listener binds to.
    pub listen_addr: SocketAddr,

    /// Address other peers should use to reach this node, announced to the
    /// peer/key store. Distinct from `listen_addr` since a node may bind
    /// `0.0.0.0` but need to advertise a specific routable address.
    pub advertise_addr: SocketAddr,

    /// Selects the peer/key store backend. Spec.md section 1 treats the
    /// peer store and key store as one abstract service with a tracker or
    /// DHT implementation, so one selection configures both.
    pub lookup: LookupConfig,
}

fn default_init_dir() -> PathBuf {
    dirs_home().join(".5yncr")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Peer/key store backend selection (spec.md section 6: `type: "tracker" |
/// "dht"` with backend-specific fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LookupConfig {
    Tracker { ip: IpAddr, port: u16 },
    Dht {
        #[serde(default)]
        bootstrap_ips: Vec<IpAddr>,
        #[serde(default)]
        bootstrap_ports: Vec<u16>,
        listen_port: u16,
    },
}

impl NodeConfig {
    pub fn drops_registry_dir(&self) -> PathBuf {
        self.init_dir.join("drops")
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.init_dir.join("private_key")
    }

    /// Loads a config file. The rest of the init directory (private key,
    /// drops registry) is resolved relative to `init_dir` once parsed.
    pub fn load_from_file(path: &Path) -> SyncrResult<NodeConfig> {
        let bytes = std::fs::read(path).map_err(|e| SyncrError::io(path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncrError::configuration(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_config_round_trips_through_json() {
        let json = r#"{
            "listen_addr": "127.0.0.1:9000",
            "advertise_addr": "127.0.0.1:9000",
            "lookup": { "type": "tracker", "ip": "10.0.0.5", "port": 7000 }
        }"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.init_dir, default_init_dir());
        match config.lookup {
            LookupConfig::Tracker { ip, port } => {
                assert_eq!(ip.to_string(), "10.0.0.5");
                assert_eq!(port, 7000);
            }
            _ => panic!("expected tracker config"),
        }
    }

    #[test]
    fn dht_config_defaults_bootstrap_lists_to_empty() {
        let json = r#"{
            "listen_addr": "127.0.0.1:9000",
            "advertise_addr": "127.0.0.1:9000",
            "lookup": { "type": "dht", "listen_port": 9100 }
        }"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();
        match config.lookup {
            LookupConfig::Dht { bootstrap_ips, bootstrap_ports, listen_port } => {
                assert!(bootstrap_ips.is_empty());
                assert!(bootstrap_ports.is_empty());
                assert_eq!(listen_port, 9100);
            }
            _ => panic!("expected dht config"),
        }
    }

    #[test]
    fn load_from_file_reads_a_config_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "init_dir": "/tmp/does-not-matter",
                "listen_addr": "127.0.0.1:9000",
                "advertise_addr": "127.0.0.1:9000",
                "lookup": { "type": "dht", "listen_port": 9100 }
            }"#,
        )
        .unwrap();

        let config = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.init_dir, PathBuf::from("/tmp/does-not-matter"));
    }

    #[test]
    fn load_from_file_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = NodeConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, SyncrError::Configuration(_)));
    }
}
