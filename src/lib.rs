//! Crawl Cluster Master Library
//!
//! This library crate defines the coordination core of the crawl-cluster
//! master process. It serves as the foundation for the binary executable
//! (`main.rs`).
//!
//! ## Architecture Modules
//! The master is composed of the following loosely coupled subsystems:
//!
//! - **`protocol`**: The encrypted wire envelope. Defines the closed set of
//!   directives exchanged with worker nodes and the codec that turns a
//!   transmission into a single base64 line and back.
//! - **`registry`**: The cluster coordination layer. Tracks worker node
//!   identity and pool membership (waiting/working) and keeps the ledger of
//!   outstanding requests awaiting a response.
//! - **`scheduler`**: The admission-controlled work queue and the periodic
//!   delegate loop that matches eligible nodes to queued work orders.
//! - **`server`**: The TCP listener that decodes node responses, correlates
//!   them against the ledger and applies state transitions, plus the
//!   operator console and the outbound delivery path.
//! - **`housekeeping`**: Independent periodic reconciliation actors:
//!   aliveness testing, node recruitment, shutdown reconciliation and
//!   request timeout sweeping.
//! - **`orchestrator`**: One run per actively crawling data source. Produces
//!   work orders, feeds the queue under the per-source cap and tracks
//!   completion, cancellation and the failure budget.
//! - **`persistence`**: The collaborator seam. Traits for the node
//!   directory, source run-state store, response applier and notification
//!   sink, with in-memory implementations.
//! - **`bots`**: The seed-URL capability table keyed by bot class.

pub mod bots;
pub mod config;
pub mod housekeeping;
pub mod orchestrator;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod state;
