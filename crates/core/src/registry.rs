// crates/core/src/registry.rs
//! In-memory directory of known sensor nodes.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use sensorhub_types::Node;

/// Registry of sensor nodes keyed by id.
///
/// Nodes are infrastructure rather than user data, so listing is never
/// owner-filtered. Entries are kept in registration order and are never
/// evicted; a node that goes offline stays listed until restart.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node shell for `id` with timestamps set to now. Not registered.
    pub fn create_node(&self, id: impl Into<String>) -> Node {
        Node::new(id)
    }

    /// Insert `node`, or overwrite the descriptive fields of the node with the
    /// same id. The original creation time and last fetch are kept.
    pub fn upsert(&self, mut node: Node) -> Node {
        let now = Utc::now();
        let mut nodes = self.write();
        match nodes.iter_mut().find(|n| n.id.eq_ignore_ascii_case(&node.id)) {
            Some(existing) => {
                existing.role = node.role;
                existing.description = node.description;
                existing.address = node.address;
                existing.update_time = now;
                existing.clone()
            }
            None => {
                if node.create_time == DateTime::<Utc>::default() {
                    node.create_time = now;
                }
                node.update_time = now;
                tracing::info!(node_id = %node.id, role = %node.role, "Node registered");
                nodes.push(node.clone());
                node
            }
        }
    }

    /// Stamp a poll from `node_id`, registering the node if this is its first contact.
    pub fn record_fetch(&self, node_id: &str) -> Node {
        let now = Utc::now();
        let mut nodes = self.write();
        if let Some(existing) = nodes.iter_mut().find(|n| n.id.eq_ignore_ascii_case(node_id)) {
            existing.last_fetch = Some(now);
            existing.update_time = now;
            return existing.clone();
        }

        let mut node = Node::new(node_id);
        node.last_fetch = Some(now);
        tracing::info!(node_id = %node_id, "Node registered on first poll");
        nodes.push(node.clone());
        node
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.read()
            .iter()
            .find(|n| n.id.eq_ignore_ascii_case(node_id))
            .cloned()
    }

    pub fn list(&self) -> Vec<Node> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Node>> {
        self.nodes.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading node registry: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Node>> {
        self.nodes.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing node registry: {e}");
            e.into_inner()
        })
    }
}
