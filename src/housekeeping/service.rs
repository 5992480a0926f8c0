//! The four reconciliation loops.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{now_ms, status_reason, Directive, MessageClass, SourceStatus, Transmission};
use crate::registry::WorkerNode;
use crate::server::delivery;
use crate::state::ClusterState;

pub struct Housekeeping {
    state: Arc<ClusterState>,
}

impl Housekeeping {
    pub fn new(state: Arc<ClusterState>) -> Arc<Self> {
        Arc::new(Self { state })
    }

    /// Spawns all four loops and returns immediately.
    pub fn start(self: Arc<Self>, token: CancellationToken) {
        tracing::info!("Starting housekeeping loops");

        {
            let service = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                service.aliveness_loop(token).await;
            });
        }
        {
            let service = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                service.recruiter_loop(token).await;
            });
        }
        {
            let service = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                service.shutdown_reconciler_loop(token).await;
            });
        }
        {
            let service = self;
            tokio::spawn(async move {
                service.timeout_reconciler_loop(token).await;
            });
        }
    }

    /// Handshakes every pooled node plus persisted failure-status nodes.
    async fn aliveness_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.state.config.aliveness_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.aliveness_pass().await,
            }
        }
        tracing::info!("Aliveness loop stopped");
    }

    async fn aliveness_pass(&self) {
        let mut targets: Vec<WorkerNode> = self.state.registry.pooled_nodes();
        targets.extend(self.state.directory.failure_nodes());

        let mut seen = HashSet::new();
        for node in targets {
            if !seen.insert(node.id) {
                continue;
            }
            // A handshake already in flight means this node is covered.
            if self
                .state
                .ledger
                .has_outstanding(node.id, MessageClass::Handshake)
            {
                continue;
            }
            let _ = delivery::send_handshake(&self.state, &node).await;
        }
    }

    /// Handshakes persisted nodes awaiting first contact.
    async fn recruiter_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.state.config.recruiter_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.recruiter_pass().await,
            }
        }
        tracing::info!("Recruiter loop stopped");
    }

    async fn recruiter_pass(&self) {
        for node in self.state.directory.awaiting_connection() {
            if self.state.registry.is_pooled(node.id) {
                continue;
            }
            if self.state.ledger.node_has_any_outstanding(node.id) {
                continue;
            }
            tracing::info!("Recruiting node {} at {}", node.id, node.endpoint());
            let _ = delivery::send_handshake(&self.state, &node).await;
        }
    }

    /// Drops pooled nodes that disappeared from the node directory.
    async fn shutdown_reconciler_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.state.config.shutdown_reconcile_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.shutdown_reconcile_pass(),
            }
        }
        tracing::info!("Shutdown reconciler stopped");
    }

    pub(crate) fn shutdown_reconcile_pass(&self) {
        for node in self.state.registry.pooled_nodes() {
            if self.state.directory.contains(node.id) {
                continue;
            }

            let was_working = self.state.registry.is_working(node.id);
            self.state.registry.drop_node(node.id);
            let purged = self.state.ledger.purge_node(node.id);
            tracing::warn!(
                "Node {} left the directory; dropped from the pools, {} ledger entries purged",
                node.id,
                purged.len()
            );

            if !was_working {
                continue;
            }
            for entry in purged {
                // GENERIC orders get a synthesized failure so the run's
                // completion accounting stays whole. LISTING orders are
                // resumed by the source-level run logic instead.
                if entry.transmission.directive != Directive::GatherAndBuild {
                    continue;
                }
                if let Some(source_id) = entry.transmission.source_id() {
                    let url_count = entry.transmission.urls.as_ref().map(Vec::len).unwrap_or(0);
                    self.state.record_order_failure(source_id, url_count);
                }
                let mut failure = Transmission::new(Directive::WorkFinishFailure)
                    .with_node(entry.node_id)
                    .with_details(status_reason::SHUTDOWN);
                failure.urls = entry.transmission.urls.clone();
                failure.data_source = entry.transmission.data_source.clone();
                self.state.applier.apply(&failure);
            }
        }
    }

    /// Drives the ledger sweep and applies the timeout policy.
    async fn timeout_reconciler_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.state.config.timeout_reconcile_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.timeout_pass(now_ms()),
            }
        }
        tracing::info!("Timeout reconciler stopped");
    }

    pub(crate) fn timeout_pass(&self, now_ms: u64) {
        for expired in self.state.ledger.sweep(now_ms) {
            tracing::warn!(
                "Request {:?} to node {} timed out after {:?}",
                expired.transmission.directive,
                expired.node_id,
                expired.transmission.directive.timeout()
            );

            if expired.transmission.directive.is_work_order() {
                if let Some(source_id) = expired.transmission.source_id() {
                    self.state.sources.set_status(
                        source_id,
                        SourceStatus::Failed,
                        Some(status_reason::TIMEOUT),
                    );
                    let url_count = expired.transmission.urls.as_ref().map(Vec::len).unwrap_or(0);
                    self.state.record_order_failure(source_id, url_count);
                }
                let mut failure = Transmission::new(Directive::WorkFinishFailure)
                    .with_node(expired.node_id)
                    .with_details(status_reason::TIMEOUT);
                failure.urls = expired.transmission.urls.clone();
                failure.data_source = expired.transmission.data_source.clone();
                self.state.applier.apply(&failure);
            } else {
                self.state.force_node_failure(expired.node_id);
            }
        }
    }
}
