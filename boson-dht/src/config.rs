//! Node configuration
//!
//! JSON configuration with the externally recognized keys. Either a hex
//! `privateKey` or `generatePrivateKey` must be provided; everything else
//! has defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use boson_crypto::{KeyPair, PrivateKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::Id;
use crate::node_info::NodeInfo;

/// Default UDP port of the overlay
pub const DEFAULT_PORT: u16 = 39001;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// IPv4 listen address; absent disables the family
    pub host4: Option<String>,
    /// IPv6 listen address; absent disables the family
    pub host6: Option<String>,
    pub port: u16,
    /// Hex-encoded Ed25519 seed
    pub private_key: Option<String>,
    /// Generate an ephemeral identity when no key is configured
    pub generate_private_key: bool,
    /// Directory for routing caches and other node state
    pub data_path: Option<PathBuf>,
    pub bootstrap: Vec<BootstrapNode>,
    /// Relaxes Sybil thresholds and allows bogon peers
    pub developer_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapNode {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host4: Some("0.0.0.0".to_string()),
            host6: None,
            port: DEFAULT_PORT,
            private_key: None,
            generate_private_key: true,
            data_path: None,
            bootstrap: Vec::new(),
            developer_mode: false,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::State(format!("config {}: {}", path.display(), e)))
    }

    /// Resolve the node identity from the configured key material
    pub fn keypair(&self) -> Result<KeyPair> {
        match &self.private_key {
            Some(hex_seed) => {
                let bytes = hex::decode(hex_seed.trim_start_matches("0x"))
                    .map_err(|e| Error::State(format!("privateKey: {}", e)))?;
                Ok(KeyPair::from_private_key(&PrivateKey::from_bytes(&bytes)?))
            }
            None if self.generate_private_key => Ok(KeyPair::random()),
            None => Err(Error::State(
                "no privateKey configured and generatePrivateKey is off".into(),
            )),
        }
    }

    pub fn addr4(&self) -> Result<Option<SocketAddr>> {
        self.listen_addr(self.host4.as_deref(), false)
    }

    pub fn addr6(&self) -> Result<Option<SocketAddr>> {
        self.listen_addr(self.host6.as_deref(), true)
    }

    fn listen_addr(&self, host: Option<&str>, v6: bool) -> Result<Option<SocketAddr>> {
        let Some(host) = host else {
            return Ok(None);
        };
        let ip: IpAddr = host
            .parse()
            .map_err(|_| Error::State(format!("invalid listen address '{}'", host)))?;
        if ip.is_ipv6() != v6 {
            return Err(Error::State(format!(
                "listen address '{}' does not match its address family",
                host
            )));
        }
        Ok(Some(SocketAddr::new(ip, self.port)))
    }

    /// Seed contacts, resolved and validated
    pub fn bootstrap_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.bootstrap
            .iter()
            .map(|seed| {
                let id: Id = seed
                    .id
                    .parse()
                    .map_err(|e| Error::State(format!("bootstrap id '{}': {}", seed.id, e)))?;
                let ip: IpAddr = seed.host.parse().map_err(|_| {
                    Error::State(format!("bootstrap host '{}' is not an address", seed.host))
                })?;
                Ok(NodeInfo::new(id, SocketAddr::new(ip, seed.port)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.generate_private_key);
        assert!(config.keypair().is_ok());
    }

    #[test]
    fn test_parse_recognized_keys() -> Result<()> {
        let raw = r#"{
            "host4": "127.0.0.1",
            "port": 39002,
            "privateKey": "2f2e2d2c2b2a292827262524232221201f1e1d1c1b1a19181716151413121110",
            "dataPath": "/tmp/boson",
            "bootstrap": [],
            "developerMode": true
        }"#;
        let config: NodeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.port, 39002);
        assert!(config.developer_mode);

        let kp = config.keypair()?;
        let again = config.keypair()?;
        assert_eq!(kp.public_key(), again.public_key());

        assert_eq!(
            config.addr4()?.unwrap(),
            "127.0.0.1:39002".parse().unwrap()
        );
        assert!(config.addr6()?.is_none());
        Ok(())
    }

    #[test]
    fn test_missing_key_rejected() {
        let config = NodeConfig {
            generate_private_key: false,
            ..Default::default()
        };
        assert!(config.keypair().is_err());
    }

    #[test]
    fn test_family_mismatch_rejected() {
        let config = NodeConfig {
            host4: Some("::1".to_string()),
            ..Default::default()
        };
        assert!(config.addr4().is_err());
    }
}
