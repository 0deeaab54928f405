//! Node configuration from environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use garden_view::{Grouping, DEFAULT_GROUP_GAP_MS};

use crate::error::{Error, Result};

/// Configuration for a Garden node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Explicit node id. When unset, the id stored next to the log is used
    /// (and created on first start).
    pub id: Option<String>,

    /// File holding the persisted log
    pub data_file: PathBuf,

    /// TCP listen address for peers
    pub listen_addr: SocketAddr,

    /// Peers to dial at startup
    pub bootstrap_peers: Vec<String>,

    /// Channel shown and posted to at startup
    pub channel: String,

    /// Thread grouping rule for rendering
    pub grouping: Grouping,

    /// Relay received messages to other peers
    pub relay: bool,
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup (environment, tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let id = lookup("GARDEN_ID").filter(|s| !s.trim().is_empty());

        let data_file = PathBuf::from(
            lookup("GARDEN_DATA_FILE").unwrap_or_else(|| "./garden-data/log.txt".to_string()),
        );

        let listen_addr: SocketAddr = lookup("GARDEN_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:9400".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("invalid GARDEN_LISTEN_ADDR: {e}")))?;

        let bootstrap_peers = lookup("GARDEN_PEERS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let channel = lookup("GARDEN_CHANNEL").unwrap_or_else(|| "#garden".to_string());
        if channel.trim().is_empty() {
            return Err(Error::Config("GARDEN_CHANNEL must not be empty".into()));
        }

        let gap_ms: u64 = match lookup("GARDEN_GROUP_GAP_MS") {
            Some(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("invalid GARDEN_GROUP_GAP_MS: {e}")))?,
            None => DEFAULT_GROUP_GAP_MS,
        };

        let relay = match lookup("GARDEN_RELAY").as_deref() {
            None | Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            Some(other) => {
                return Err(Error::Config(format!("invalid GARDEN_RELAY: {other}")));
            }
        };

        Ok(Self {
            id,
            data_file,
            listen_addr,
            bootstrap_peers,
            channel,
            grouping: Grouping::new(gap_ms),
            relay,
        })
    }

    /// Path of the stored node id.
    pub fn id_file(&self) -> PathBuf {
        self.data_file.with_file_name("id")
    }

    /// The node id: explicit, stored, or freshly generated and stored.
    pub fn resolve_id(&self) -> Result<String> {
        match &self.id {
            Some(id) => Ok(id.clone()),
            None => load_or_create_id(&self.id_file()),
        }
    }
}

/// Read the node id at `path`, generating and persisting one if absent.
pub fn load_or_create_id(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(id) if !id.trim().is_empty() => return Ok(id.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let id = hex::encode(rand::random::<[u8; 8]>());
    std::fs::write(path, &id)?;
    tracing::info!("Generated node id {}", id);
    Ok(id)
}
