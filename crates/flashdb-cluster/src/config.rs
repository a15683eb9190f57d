//! Cluster topology config (`cluster.json`).
//!
//! ```json
//! {
//!   "nodes": [
//!     { "id": "node-1", "addr": "127.0.0.1:6379", "role": "master",
//!       "slots": [0, 1023], "replicas": ["127.0.0.1:6380"] }
//!   ]
//! }
//! ```
//!
//! Slots are inclusive ranges. The config is trusted: the router does
//! not validate that ranges tile the slot universe without overlap.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading the cluster config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read cluster config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse cluster config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A node's role in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Replica,
}

/// A single node in the cluster topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node id.
    pub id: String,
    /// Client-facing wire address, e.g. `127.0.0.1:6379`.
    pub addr: String,
    pub role: NodeRole,
    /// Inclusive slot range `[lo, hi]` owned by this node.
    pub slots: [u16; 2],
    /// Addresses of this node's replicas.
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl NodeInfo {
    /// Returns true if this node's range contains the slot.
    pub fn owns_slot(&self, slot: u16) -> bool {
        slot >= self.slots[0] && slot <= self.slots[1]
    }
}

/// All nodes in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeInfo>,
}

impl ClusterConfig {
    /// Reads and parses a cluster config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }
}
