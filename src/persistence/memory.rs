//! In-memory implementations of the persistence collaborators.
//!
//! Backing stores are plain concurrent maps; semantics match what the
//! relational layer provides in production. The recording applier and
//! notifier additionally keep everything they receive, which is what the
//! coordination tests assert against.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{NodeDirectory, Notifier, ResponseApplier, SourceStore};
use crate::protocol::{DataSourceSnapshot, RunStats, SourceStatus, Transmission};
use crate::registry::{ConnectionStatus, WorkerNode};
use anyhow::{bail, Result};

/// Per-URL tracking state for a source's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlState {
    Pending,
    Dispatched,
    NotRun,
}

pub struct MemoryNodeDirectory {
    nodes: DashMap<i64, WorkerNode>,
    master_slot: AtomicBool,
}

impl MemoryNodeDirectory {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            master_slot: AtomicBool::new(false),
        }
    }

    pub fn remove_node(&self, node_id: i64) {
        self.nodes.remove(&node_id);
    }
}

impl Default for MemoryNodeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDirectory for MemoryNodeDirectory {
    fn all_nodes(&self) -> Vec<WorkerNode> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    fn awaiting_connection(&self) -> Vec<WorkerNode> {
        self.nodes
            .iter()
            .filter(|e| e.value().connection_status == ConnectionStatus::Unknown)
            .map(|e| e.value().clone())
            .collect()
    }

    fn failure_nodes(&self) -> Vec<WorkerNode> {
        self.nodes
            .iter()
            .filter(|e| e.value().connection_status == ConnectionStatus::Failure)
            .map(|e| e.value().clone())
            .collect()
    }

    fn get_node(&self, node_id: i64) -> Option<WorkerNode> {
        self.nodes.get(&node_id).map(|e| e.value().clone())
    }

    fn contains(&self, node_id: i64) -> bool {
        self.nodes.contains_key(&node_id)
    }

    fn save_node(&self, node: &WorkerNode) {
        self.nodes.insert(node.id, node.clone());
    }

    fn acquire_master_slot(&self) -> Result<()> {
        if self.master_slot.swap(true, Ordering::SeqCst) {
            bail!("another master is already registered");
        }
        Ok(())
    }

    fn release_master_slot(&self) {
        self.master_slot.store(false, Ordering::SeqCst);
    }
}

pub struct MemorySourceStore {
    sources: DashMap<i64, DataSourceSnapshot>,
    urls: DashMap<i64, HashMap<String, UrlState>>,
    last_run_ms: DashMap<i64, u64>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            urls: DashMap::new(),
            last_run_ms: DashMap::new(),
        }
    }

    pub fn insert_source(&self, source: DataSourceSnapshot) {
        self.sources.insert(source.id, source);
    }

    pub fn url_state(&self, source_id: i64, url: &str) -> Option<UrlState> {
        self.urls.get(&source_id).and_then(|m| m.get(url).copied())
    }

    pub fn set_last_run(&self, source_id: i64, at_ms: u64) {
        self.last_run_ms.insert(source_id, at_ms);
    }
}

impl Default for MemorySourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceStore for MemorySourceStore {
    fn get_source(&self, source_id: i64) -> Option<DataSourceSnapshot> {
        self.sources.get(&source_id).map(|e| e.value().clone())
    }

    fn running_sources(&self) -> Vec<DataSourceSnapshot> {
        self.sources
            .iter()
            .filter(|e| e.value().status == SourceStatus::Running)
            .map(|e| e.value().clone())
            .collect()
    }

    fn due_sources(&self, now_ms: u64) -> Vec<DataSourceSnapshot> {
        self.sources
            .iter()
            .filter(|e| e.value().status == SourceStatus::Staged)
            .filter(|e| {
                let interval_ms = e.value().days_between_runs as u64 * 24 * 60 * 60 * 1000;
                match self.last_run_ms.get(&e.value().id) {
                    Some(last) => now_ms.saturating_sub(*last) >= interval_ms,
                    None => true,
                }
            })
            .map(|e| e.value().clone())
            .collect()
    }

    fn set_status(&self, source_id: i64, status: SourceStatus, reason: Option<&str>) {
        if let Some(mut source) = self.sources.get_mut(&source_id) {
            source.status = status;
            source.status_reason = reason.map(str::to_string);
        }
    }

    fn record_run_stats(&self, source_id: i64, stats: &RunStats) {
        if let Some(mut source) = self.sources.get_mut(&source_id) {
            source.stats = stats.clone();
        }
        self.last_run_ms
            .insert(source_id, crate::protocol::now_ms());
    }

    fn register_urls(&self, source_id: i64, urls: &[String]) {
        let mut map = self.urls.entry(source_id).or_default();
        for url in urls {
            map.entry(url.clone()).or_insert(UrlState::Pending);
        }
    }

    fn mark_dispatched(&self, source_id: i64, urls: &[String]) {
        let mut map = self.urls.entry(source_id).or_default();
        for url in urls {
            map.insert(url.clone(), UrlState::Dispatched);
        }
    }

    fn mark_not_run(&self, source_id: i64, urls: &[String]) {
        let mut map = self.urls.entry(source_id).or_default();
        for url in urls {
            map.insert(url.clone(), UrlState::NotRun);
        }
    }
}

/// Applier that records every transmission it is handed.
pub struct RecordingApplier {
    applied: Mutex<Vec<Transmission>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<Transmission> {
        self.applied.lock().clone()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }
}

impl Default for RecordingApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseApplier for RecordingApplier {
    fn apply(&self, transmission: &Transmission) {
        tracing::debug!(
            "Applying {:?} response for source {:?}",
            transmission.directive,
            transmission.source_id()
        );
        self.applied.lock().push(transmission.clone());
    }
}

/// Notifier that logs and records.
pub struct LogNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) {
        tracing::info!("Notification: {} - {}", subject, body);
        self.sent.lock().push((subject.to_string(), body.to_string()));
    }
}
