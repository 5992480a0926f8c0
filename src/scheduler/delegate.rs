//! Work Delegate
//!
//! The single periodic loop that hands queued work orders to eligible
//! nodes. Each tick classifies every pooled node against the per-node
//! in-flight caps, then scans the queue from the head on behalf of each
//! eligible node, buffering entries the node cannot take and restoring
//! them unchanged. A skipped entry is simply revisited on the next tick.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::protocol::WorkKind;
use crate::registry::WorkerNode;
use crate::server::delivery;
use crate::state::ClusterState;

/// What a node can accept this scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Under both caps; any order kind.
    Agnostic,
    GenericOnly,
    ListingOnly,
    Ineligible,
}

impl Eligibility {
    pub fn accepts(&self, kind: WorkKind) -> bool {
        match self {
            Eligibility::Agnostic => true,
            Eligibility::GenericOnly => kind == WorkKind::Generic,
            Eligibility::ListingOnly => kind == WorkKind::Listing,
            Eligibility::Ineligible => false,
        }
    }
}

/// Classifies a pooled node for the current pass.
///
/// Waiting nodes are always agnostic. Working nodes are compared against
/// the per-kind in-flight caps.
pub fn classify_node(state: &ClusterState, node: &WorkerNode) -> Eligibility {
    if state.registry.is_waiting(node.id) {
        return Eligibility::Agnostic;
    }

    let generic = state.ledger.inflight_for_node(node.id, WorkKind::Generic);
    let listing = state.ledger.inflight_for_node(node.id, WorkKind::Listing);
    let under_generic = generic < state.config.max_generic_per_node;
    let under_listing = listing < state.config.max_listing_per_node;

    match (under_generic, under_listing) {
        (true, true) => Eligibility::Agnostic,
        (true, false) => Eligibility::GenericOnly,
        (false, true) => Eligibility::ListingOnly,
        (false, false) => Eligibility::Ineligible,
    }
}

pub struct WorkDelegate {
    state: Arc<ClusterState>,
}

impl WorkDelegate {
    pub fn new(state: Arc<ClusterState>) -> Self {
        Self { state }
    }

    /// Runs the delegate loop until cancelled.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!("Work delegate started");
        let mut interval = tokio::time::interval(self.state.config.delegate_interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Work delegate stopping");
                    break;
                }
                _ = interval.tick() => {
                    tick(&self.state).await;
                }
            }
        }
    }
}

/// One scheduling pass.
pub async fn tick(state: &ClusterState) {
    if !state.has_running_sources() {
        return;
    }
    let nodes = state.registry.pooled_nodes();
    if nodes.is_empty() {
        return;
    }

    for node in nodes {
        let eligibility = classify_node(state, &node);
        if eligibility == Eligibility::Ineligible {
            continue;
        }

        if let Some(order) = select_order(state, &node, eligibility) {
            dispatch(state, &node, order).await;
        }
    }
}

/// Scans the queue from the head for the first entry this node can take.
///
/// Entries of the wrong kind, and LISTING entries for a source the node
/// already runs a listing order for, are buffered and restored to the
/// head in their original relative order.
fn select_order(
    state: &ClusterState,
    node: &WorkerNode,
    eligibility: Eligibility,
) -> Option<crate::protocol::Transmission> {
    let mut buffered = Vec::new();
    let mut selected = None;

    while let Some(entry) = state.queue.pop_first() {
        let acceptable = match entry.work_kind() {
            Some(kind) => {
                let anti_affinity = kind == WorkKind::Listing
                    && entry
                        .source_id()
                        .map(|sid| state.ledger.node_has_listing_for(node.id, sid))
                        .unwrap_or(false);
                eligibility.accepts(kind) && !anti_affinity
            }
            // Non-order entries never belong here; push them back untouched.
            None => false,
        };

        if acceptable {
            selected = Some(entry);
            break;
        }
        buffered.push(entry);
    }

    state.queue.restore_first(buffered);
    selected
}

/// Dispatches the selected order to the node.
///
/// On delivery failure the order returns to the queue head with its node
/// id cleared; the ledger entry was already rolled back by the delivery
/// path.
async fn dispatch(state: &ClusterState, node: &WorkerNode, order: crate::protocol::Transmission) {
    let mut order = order;
    order.node_id = Some(node.id);

    match delivery::dispatch_order(state, node, &order).await {
        Ok(()) => {
            let description = state.ledger.describe_node_work(node.id);
            state.registry.mark_working(node.id, &description);
            tracing::info!(
                "Dispatched {:?} for source {:?} to node {}",
                order.directive,
                order.source_id(),
                node.id
            );
        }
        Err(e) => {
            tracing::warn!(
                "Dispatch to node {} failed, returning order to the queue head: {}",
                node.id,
                e
            );
            order.node_id = None;
            state.queue.offer_first(order);
        }
    }
}
