//! Cluster State
//!
//! The explicit context object holding every shared structure of the
//! master: registry pools, sent-request ledger, work queue, the active-run
//! table and the persistence collaborators. Constructed once per process
//! and passed to every component; there are no hidden globals, which is
//! what preserves the single-master semantics.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::bots::BotRegistry;
use crate::config::Config;
use crate::persistence::{NodeDirectory, Notifier, ResponseApplier, SourceStore};
use crate::protocol::codec;
use crate::registry::{NodeRegistry, SentRequestLedger};
use crate::scheduler::WorkQueue;

/// Book-keeping for one active source run.
pub struct RunHandle {
    /// Cancels the run's orchestrator loop.
    pub token: CancellationToken,
    /// Failed work orders observed for this run, fed by the listener's
    /// completion path and the reconciliation sweeps, read against the
    /// failure budget.
    pub failed_orders: AtomicU32,
    /// URLs carried by those failed orders, read by the run's statistics.
    pub failed_urls: AtomicU32,
}

pub struct ClusterState {
    pub config: Config,
    pub envelope_key: [u8; 32],

    pub registry: NodeRegistry,
    pub ledger: SentRequestLedger,
    pub queue: WorkQueue,

    pub directory: Arc<dyn NodeDirectory>,
    pub sources: Arc<dyn SourceStore>,
    pub applier: Arc<dyn ResponseApplier>,
    pub notifier: Arc<dyn Notifier>,
    pub bots: Arc<BotRegistry>,

    /// Active runs by source id.
    pub runs: DashMap<i64, Arc<RunHandle>>,

    /// Root cancellation signal: loops, listener and orchestrators all
    /// observe children of this token.
    pub shutdown_token: CancellationToken,
}

impl ClusterState {
    pub fn new(
        config: Config,
        directory: Arc<dyn NodeDirectory>,
        sources: Arc<dyn SourceStore>,
        applier: Arc<dyn ResponseApplier>,
        notifier: Arc<dyn Notifier>,
        bots: Arc<BotRegistry>,
    ) -> Arc<Self> {
        let envelope_key = codec::key_from_secret(&config.envelope_secret);
        Arc::new(Self {
            config,
            envelope_key,
            registry: NodeRegistry::new(),
            ledger: SentRequestLedger::new(),
            queue: WorkQueue::new(),
            directory,
            sources,
            applier,
            notifier,
            bots,
            runs: DashMap::new(),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Queued + in-flight work orders for a source; admission compares
    /// this against the source's configured cap.
    pub fn source_load(&self, source_id: i64) -> usize {
        self.queue.queued_for_source(source_id) + self.ledger.inflight_for_source(source_id)
    }

    pub fn has_running_sources(&self) -> bool {
        !self.runs.is_empty()
    }

    pub fn running_source_ids(&self) -> Vec<i64> {
        self.runs.iter().map(|e| *e.key()).collect()
    }

    /// Registers a run; a source can have at most one.
    pub fn register_run(&self, source_id: i64) -> Option<Arc<RunHandle>> {
        if self.runs.contains_key(&source_id) {
            tracing::warn!("Source {} already has an active run", source_id);
            return None;
        }
        let handle = Arc::new(RunHandle {
            token: self.shutdown_token.child_token(),
            failed_orders: AtomicU32::new(0),
            failed_urls: AtomicU32::new(0),
        });
        self.runs.insert(source_id, handle.clone());
        Some(handle)
    }

    pub fn unregister_run(&self, source_id: i64) {
        self.runs.remove(&source_id);
    }

    /// Counts one failed work order, carrying `url_count` URLs, toward the
    /// source's budget. Returns the new order total when the source has an
    /// active run.
    pub fn record_order_failure(&self, source_id: i64, url_count: usize) -> Option<u32> {
        self.runs.get(&source_id).map(|handle| {
            handle
                .failed_urls
                .fetch_add(url_count as u32, Ordering::SeqCst);
            handle.failed_orders.fetch_add(1, Ordering::SeqCst) + 1
        })
    }

    pub fn run_failed_orders(&self, source_id: i64) -> u32 {
        self.runs
            .get(&source_id)
            .map(|handle| handle.failed_orders.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn run_failed_urls(&self, source_id: i64) -> u32 {
        self.runs
            .get(&source_id)
            .map(|handle| handle.failed_urls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Forces a node into the failure state and persists it.
    ///
    /// Covers handshake failures, exhausted delivery retries and
    /// non-work-message timeouts. Idempotent: a node that already left the
    /// pools only gets its persisted status refreshed.
    pub fn force_node_failure(&self, node_id: i64) {
        match self.registry.mark_failure(node_id) {
            Some(node) => self.directory.save_node(&node),
            None => {
                if let Some(mut node) = self.directory.get_node(node_id) {
                    if node.connection_status != crate::registry::ConnectionStatus::Failure {
                        node.connection_status = crate::registry::ConnectionStatus::Failure;
                        node.working = false;
                        self.directory.save_node(&node);
                    }
                }
            }
        }
    }

    /// Signals cancellation to every active run.
    pub fn cancel_all_runs(&self) {
        for entry in self.runs.iter() {
            entry.value().token.cancel();
        }
    }
}
