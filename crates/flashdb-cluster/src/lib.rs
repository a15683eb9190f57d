//! flashdb-cluster: static slot routing.
//!
//! Maps keys to one of 1,024 hash slots via CRC16 and resolves each
//! slot to its owning node from a JSON cluster config loaded once at
//! startup. There is no gossip or resharding — the topology is fixed
//! for the life of the process.

pub mod config;
pub mod crc16;
pub mod router;

pub use config::{ClusterConfig, ConfigError, NodeInfo, NodeRole};
pub use crc16::{crc16, key_slot, SLOT_COUNT};
pub use router::SlotRouter;
