//! The slot router: slot → owner resolution and the MOVED decision.
//!
//! Built once from the cluster config at startup and immutable after
//! that, so lookups are lock-free reads.

use crate::config::{ClusterConfig, NodeInfo};
use crate::crc16::{key_slot, SLOT_COUNT};

/// Resolves slots to owning nodes for one local node.
#[derive(Debug)]
pub struct SlotRouter {
    self_addr: String,
    /// The local node's entry in the config, if it appears there.
    self_node: Option<NodeInfo>,
    /// Owner address per slot; empty string = unassigned.
    owners: Vec<String>,
}

impl SlotRouter {
    /// Builds a router for the node bound at `self_addr`.
    ///
    /// Every node's slot range is flattened into the per-slot owner
    /// table; ranges reaching past the slot universe are truncated.
    pub fn from_config(cfg: &ClusterConfig, self_addr: &str) -> Self {
        let mut owners = vec![String::new(); SLOT_COUNT as usize];
        let mut self_node = None;

        for node in &cfg.nodes {
            if node.addr == self_addr {
                self_node = Some(node.clone());
            }
            let lo = node.slots[0].min(SLOT_COUNT - 1);
            let hi = node.slots[1].min(SLOT_COUNT - 1);
            for slot in lo..=hi {
                owners[slot as usize] = node.addr.clone();
            }
        }

        Self {
            self_addr: self_addr.to_owned(),
            self_node,
            owners,
        }
    }

    /// Computes the slot for a key.
    pub fn slot(&self, key: &[u8]) -> u16 {
        key_slot(key)
    }

    /// Returns the owner address of a slot, or `""` if unassigned.
    pub fn owner(&self, slot: u16) -> &str {
        self.owners
            .get(slot as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Returns true if the local node's slot range contains `slot`.
    pub fn is_local(&self, slot: u16) -> bool {
        self.self_node
            .as_ref()
            .map(|n| n.owns_slot(slot))
            .unwrap_or(false)
    }

    /// The MOVED decision for a key.
    ///
    /// Returns `Some((slot, owner))` when the request must be redirected:
    /// the slot has a known owner, that owner is another node, and the
    /// slot is not in the local range. Returns `None` when the request
    /// should be served here.
    pub fn redirect(&self, key: &[u8]) -> Option<(u16, &str)> {
        let slot = self.slot(key);
        let owner = self.owner(slot);
        if !owner.is_empty() && owner != self.self_addr && !self.is_local(slot) {
            Some((slot, owner))
        } else {
            None
        }
    }

    /// The local node's config entry, if present.
    pub fn self_node(&self) -> Option<&NodeInfo> {
        self.self_node.as_ref()
    }
}
