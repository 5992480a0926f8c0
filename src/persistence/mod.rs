//! Persistence Collaborators
//!
//! The coordination core consumes persistence as a set of narrow traits:
//! node-directory CRUD plus the two recruitment queries, data-source
//! run-state and URL tracking, the "handle data-source transmission
//! response" applier, and a fire-and-forget notification sink.
//!
//! The relational layer behind these traits is out of scope here;
//! `memory` provides complete in-memory implementations used by the
//! binary and by tests.

pub mod memory;

use crate::protocol::{DataSourceSnapshot, RunStats, SourceStatus, Transmission};
use crate::registry::WorkerNode;
use anyhow::Result;

/// The persisted node directory.
pub trait NodeDirectory: Send + Sync {
    fn all_nodes(&self) -> Vec<WorkerNode>;
    /// Nodes persisted but never successfully contacted.
    fn awaiting_connection(&self) -> Vec<WorkerNode>;
    /// Nodes whose last contact attempt failed.
    fn failure_nodes(&self) -> Vec<WorkerNode>;
    fn get_node(&self, node_id: i64) -> Option<WorkerNode>;
    fn contains(&self, node_id: i64) -> bool;
    fn save_node(&self, node: &WorkerNode);

    /// Claims the single master slot. Errors when another master already
    /// holds it; that is process-fatal at startup.
    fn acquire_master_slot(&self) -> Result<()>;
    fn release_master_slot(&self);
}

/// Data-source run-state and URL tracking.
pub trait SourceStore: Send + Sync {
    fn get_source(&self, source_id: i64) -> Option<DataSourceSnapshot>;
    fn running_sources(&self) -> Vec<DataSourceSnapshot>;
    /// Staged sources whose schedule interval has elapsed.
    fn due_sources(&self, now_ms: u64) -> Vec<DataSourceSnapshot>;

    fn set_status(&self, source_id: i64, status: SourceStatus, reason: Option<&str>);
    fn record_run_stats(&self, source_id: i64, stats: &RunStats);

    /// Registers the URLs a run intends to process.
    fn register_urls(&self, source_id: i64, urls: &[String]);
    /// Marks URLs as handed to the cluster.
    fn mark_dispatched(&self, source_id: i64, urls: &[String]);
    /// Marks URLs as not run, so the next run resumes them.
    fn mark_not_run(&self, source_id: i64, urls: &[String]);
}

/// Applies a node's work response to the persisted data-source state.
pub trait ResponseApplier: Send + Sync {
    fn apply(&self, transmission: &Transmission);
}

/// Operational notification sink. Fire and forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str);
}
