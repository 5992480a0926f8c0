//! Node lifecycle state machine.
//!
//! All transitions for a given node are serialized by the single registry
//! lock, shared between the listener, the scheduler and the housekeeping
//! loops. Invalid transitions are logged and ignored so loop liveness is
//! never at risk from a misbehaving node.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::types::{ConnectionStatus, WorkerNode};

#[derive(Default)]
struct Pools {
    waiting: HashMap<i64, WorkerNode>,
    working: HashMap<i64, WorkerNode>,
}

/// Tracks worker identity, connection status and pool membership.
pub struct NodeRegistry {
    pools: Mutex<Pools>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(Pools::default()),
        }
    }

    /// Handshake success: the node joins the waiting pool.
    ///
    /// Valid from unregistered or failure; clears any failure status. A
    /// node already in a pool stays where it is (logged error for the
    /// waiting pool, since that is a double insert).
    pub fn mark_waiting(&self, mut node: WorkerNode) {
        let mut pools = self.pools.lock();

        if pools.working.contains_key(&node.id) {
            tracing::error!(
                "Node {} handshook as waiting while in the working pool; keeping it working",
                node.id
            );
            return;
        }
        if pools.waiting.contains_key(&node.id) {
            tracing::error!("Node {} double-inserted into the waiting pool", node.id);
            return;
        }

        node.connection_status = ConnectionStatus::Success;
        node.working = false;
        node.work_description.clear();

        tracing::info!("Node {} joined the waiting pool", node.id);
        pools.waiting.insert(node.id, node);
    }

    /// A work order was dispatched to the node.
    ///
    /// Moves waiting -> working. A node already working only gets its
    /// description amended: one node may crawl several sources at once, and
    /// `description` always carries the complete current view.
    pub fn mark_working(&self, node_id: i64, description: &str) {
        let mut pools = self.pools.lock();

        if let Some(existing) = pools.working.get_mut(&node_id) {
            existing.work_description = description.to_string();
            tracing::debug!("Node {} work amended: {}", node_id, description);
            return;
        }

        match pools.waiting.remove(&node_id) {
            Some(mut node) => {
                node.working = true;
                node.work_description = description.to_string();
                tracing::info!("Node {} moved to the working pool: {}", node_id, description);
                pools.working.insert(node_id, node);
            }
            None => {
                tracing::error!(
                    "Work assigned to node {} which is in neither pool",
                    node_id
                );
            }
        }
    }

    /// A work order for the node finished (success or failure).
    ///
    /// If nothing else is in flight for the node it returns to the waiting
    /// pool; otherwise it stays working with the description amended.
    pub fn work_finished(&self, node_id: i64, remaining_description: &str, has_other_inflight: bool) {
        let mut pools = self.pools.lock();

        if has_other_inflight {
            if let Some(node) = pools.working.get_mut(&node_id) {
                node.work_description = remaining_description.to_string();
            }
            return;
        }

        match pools.working.remove(&node_id) {
            Some(mut node) => {
                node.working = false;
                node.work_description.clear();
                tracing::info!("Node {} returned to the waiting pool", node_id);
                pools.waiting.insert(node_id, node);
            }
            None => {
                tracing::error!(
                    "Work finished for node {} which is not in the working pool",
                    node_id
                );
            }
        }
    }

    /// Explicit failure: the node leaves both pools.
    ///
    /// Idempotent; failing an already-failed (unpooled) node is a logged
    /// no-op. Returns the removed record so the caller can persist the
    /// failure status.
    pub fn mark_failure(&self, node_id: i64) -> Option<WorkerNode> {
        let mut pools = self.pools.lock();

        let removed = pools
            .waiting
            .remove(&node_id)
            .or_else(|| pools.working.remove(&node_id));

        match removed {
            Some(mut node) => {
                node.connection_status = ConnectionStatus::Failure;
                node.working = false;
                tracing::warn!("Node {} transitioned to failure and left the pools", node_id);
                Some(node)
            }
            None => {
                tracing::info!("Node {} already failed; ignoring repeat failure", node_id);
                None
            }
        }
    }

    /// Removes the node without a failure transition (shutdown reconciliation).
    pub fn drop_node(&self, node_id: i64) -> Option<WorkerNode> {
        let mut pools = self.pools.lock();
        pools
            .waiting
            .remove(&node_id)
            .or_else(|| pools.working.remove(&node_id))
    }

    pub fn is_pooled(&self, node_id: i64) -> bool {
        let pools = self.pools.lock();
        pools.waiting.contains_key(&node_id) || pools.working.contains_key(&node_id)
    }

    pub fn is_waiting(&self, node_id: i64) -> bool {
        self.pools.lock().waiting.contains_key(&node_id)
    }

    pub fn is_working(&self, node_id: i64) -> bool {
        self.pools.lock().working.contains_key(&node_id)
    }

    pub fn waiting_nodes(&self) -> Vec<WorkerNode> {
        self.pools.lock().waiting.values().cloned().collect()
    }

    pub fn working_nodes(&self) -> Vec<WorkerNode> {
        self.pools.lock().working.values().cloned().collect()
    }

    /// Every pooled node, waiting first. Used by the scheduler and the
    /// housekeeping loops; the stable ordering keeps scheduling passes
    /// deterministic.
    pub fn pooled_nodes(&self) -> Vec<WorkerNode> {
        let pools = self.pools.lock();
        let mut nodes: Vec<WorkerNode> = pools.waiting.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        let mut working: Vec<WorkerNode> = pools.working.values().cloned().collect();
        working.sort_by_key(|n| n.id);
        nodes.extend(working);
        nodes
    }

    pub fn endpoint_of(&self, node_id: i64) -> Option<String> {
        let pools = self.pools.lock();
        pools
            .waiting
            .get(&node_id)
            .or_else(|| pools.working.get(&node_id))
            .map(|n| n.endpoint())
    }

    pub fn pool_counts(&self) -> (usize, usize) {
        let pools = self.pools.lock();
        (pools.waiting.len(), pools.working.len())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
