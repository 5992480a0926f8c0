//! Sent-Request Ledger
//!
//! The master's record of outstanding expected responses. An entry is
//! created when a response-expecting transmission is dispatched and is
//! destroyed by exactly one of: a matching response (`resolve`), the
//! timeout sweep, or a purge during shutdown reconciliation. Removal
//! happens under the ledger lock, so resolution and sweep can never both
//! claim the same entry.

use parking_lot::Mutex;

use crate::protocol::{MessageClass, Transmission, WorkKind};

/// One outstanding expectation: who we asked, what we asked, and when.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub node_id: i64,
    pub transmission: Transmission,
    pub sent_at_ms: u64,
}

impl SentRequest {
    /// Whether this entry has outlived its directive's own timeout.
    pub fn expired(&self, now_ms: u64) -> bool {
        let age_ms = now_ms.saturating_sub(self.sent_at_ms);
        age_ms > self.transmission.directive.timeout().as_millis() as u64
    }
}

pub struct SentRequestLedger {
    entries: Mutex<Vec<SentRequest>>,
}

impl SentRequestLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Inserts an entry for a dispatched transmission.
    ///
    /// Only response-expecting directives are recorded. A transmission that
    /// already has a live entry is a logged error, not a second entry:
    /// there is exactly one outstanding expectation per dispatch.
    pub fn record(&self, transmission: &Transmission, now_ms: u64) {
        if !transmission.directive.expects_response() {
            return;
        }
        let node_id = match transmission.node_id {
            Some(id) => id,
            None => {
                tracing::error!(
                    "Refusing to record {:?} without a node id",
                    transmission.directive
                );
                return;
            }
        };

        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|e| e.transmission.correlates_with(transmission))
        {
            tracing::error!(
                "Duplicate ledger record for node {} {:?}; keeping the original",
                node_id,
                transmission.directive
            );
            return;
        }

        entries.push(SentRequest {
            node_id,
            transmission: transmission.clone(),
            sent_at_ms: now_ms,
        });
    }

    /// Removes and returns the entry matching a response, if any.
    ///
    /// Matching is by (node id, classification, data source). `None` means
    /// the request was already resolved or swept; callers log that as a
    /// recoverable anomaly.
    pub fn resolve(&self, response: &Transmission) -> Option<SentRequest> {
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|e| e.transmission.correlates_with(response))?;
        Some(entries.remove(idx))
    }

    /// Removes the entry for a specific dispatched transmission (delivery
    /// failure rollback).
    pub fn discard(&self, transmission: &Transmission) -> Option<SentRequest> {
        self.resolve(transmission)
    }

    /// Removes and returns every entry older than its own timeout.
    pub fn sweep(&self, now_ms: u64) -> Vec<SentRequest> {
        let mut entries = self.entries.lock();
        let mut expired = Vec::new();
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if entry.expired(now_ms) {
                expired.push(entry);
            } else {
                kept.push(entry);
            }
        }
        *entries = kept;
        expired
    }

    /// Removes and returns every entry addressed to a node (shutdown
    /// reconciliation).
    pub fn purge_node(&self, node_id: i64) -> Vec<SentRequest> {
        let mut entries = self.entries.lock();
        let mut purged = Vec::new();
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if entry.node_id == node_id {
                purged.push(entry);
            } else {
                kept.push(entry);
            }
        }
        *entries = kept;
        purged
    }

    /// In-flight work orders for a source, all nodes.
    pub fn inflight_for_source(&self, source_id: i64) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| {
                e.transmission.directive.is_work_order() && e.transmission.source_id() == Some(source_id)
            })
            .count()
    }

    /// In-flight work orders of one kind on one node.
    pub fn inflight_for_node(&self, node_id: i64, kind: WorkKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.node_id == node_id && e.transmission.work_kind() == Some(kind))
            .count()
    }

    /// Any in-flight work at all on the node (drives the working -> waiting
    /// transition after a finish).
    pub fn node_has_inflight_work(&self, node_id: i64) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.node_id == node_id && e.transmission.directive.is_work_order())
    }

    /// Whether the node already has an outstanding request of the given
    /// classification (aliveness/recruiter skip condition).
    pub fn has_outstanding(&self, node_id: i64, class: MessageClass) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.node_id == node_id && e.transmission.class() == class)
    }

    /// Whether the node has any outstanding request at all (recruiter skip
    /// condition).
    pub fn node_has_any_outstanding(&self, node_id: i64) -> bool {
        self.entries.lock().iter().any(|e| e.node_id == node_id)
    }

    /// Whether a live entry correlates with the given transmission, without
    /// removing it (WORK_START_SUCCESS keeps its entry open).
    pub fn contains_match(&self, transmission: &Transmission) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.transmission.correlates_with(transmission))
    }

    /// LISTING anti-affinity check: does the node already run a listing
    /// order for this source?
    pub fn node_has_listing_for(&self, node_id: i64, source_id: i64) -> bool {
        self.entries.lock().iter().any(|e| {
            e.node_id == node_id
                && e.transmission.work_kind() == Some(WorkKind::Listing)
                && e.transmission.source_id() == Some(source_id)
        })
    }

    /// URLs carried by this source's outstanding work orders (run
    /// cancellation support).
    pub fn urls_for_source(&self, source_id: i64) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.transmission.source_id() == Some(source_id))
            .flat_map(|e| e.transmission.urls.clone().unwrap_or_default())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// A cheap description of current work per node, used to amend the
    /// registry description after a finish.
    pub fn describe_node_work(&self, node_id: i64) -> String {
        let entries = self.entries.lock();
        let mut parts: Vec<String> = entries
            .iter()
            .filter(|e| e.node_id == node_id && e.transmission.directive.is_work_order())
            .filter_map(|e| {
                e.transmission
                    .data_source
                    .as_ref()
                    .map(|s| format!("{}({})", s.url, s.id))
            })
            .collect();
        parts.sort();
        parts.join(" | ")
    }
}

impl Default for SentRequestLedger {
    fn default() -> Self {
        Self::new()
    }
}
