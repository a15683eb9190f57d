//! Server configuration from environment variables.
//!
//! Parsing is a pure function over a lookup closure so tests never have
//! to mutate the process environment.

use std::path::PathBuf;

/// Which side of replication this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// Default client bind address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:6379";
/// Default snapshot file, relative to the working directory.
pub const DEFAULT_SNAPSHOT: &str = "snapshot.fdb";
/// Default append-only journal file.
pub const DEFAULT_AOF: &str = "appendonly.aof";
/// Default cluster topology file.
pub const DEFAULT_CLUSTER_CONFIG: &str = "cluster.json";

/// Everything the server needs to start, resolved from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub role: Role,
    /// Address of the master's replication listener. Required in
    /// replica mode, ignored otherwise.
    pub master_addr: Option<String>,
    pub snapshot_path: PathBuf,
    pub aof_path: PathBuf,
    pub cluster_path: PathBuf,
    /// When set, a failed AOF append surfaces as an error to the client
    /// instead of being logged and swallowed.
    pub strict_aof: bool,
}

impl ServerConfig {
    /// Reads config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads config through an arbitrary lookup, for tests.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let addr = normalize_addr(&get("FLASHDB_ADDR").unwrap_or_else(|| DEFAULT_ADDR.into()));

        let role = match get("FLASHDB_ROLE").as_deref() {
            Some("replica") => Role::Replica,
            _ => Role::Master,
        };

        Self {
            addr,
            role,
            master_addr: get("FLASHDB_MASTER_ADDR"),
            snapshot_path: get("FLASHDB_SNAPSHOT")
                .unwrap_or_else(|| DEFAULT_SNAPSHOT.into())
                .into(),
            aof_path: get("FLASHDB_AOF").unwrap_or_else(|| DEFAULT_AOF.into()).into(),
            cluster_path: get("FLASHDB_CLUSTER_CONFIG")
                .unwrap_or_else(|| DEFAULT_CLUSTER_CONFIG.into())
                .into(),
            strict_aof: get("FLASHDB_AOF_STRICT")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

/// A bare `:port` binds the loopback interface, not the wildcard.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("127.0.0.1{addr}")
    } else {
        addr.to_owned()
    }
}
