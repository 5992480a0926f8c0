//! Work Queue & Scheduler
//!
//! The admission-controlled queue of pending work orders and the periodic
//! delegate loop that matches eligible nodes to them.
//!
//! ## Core Mechanisms
//! - **Queue**: append-to-tail for fresh orders, push-to-head for
//!   re-delivery and for restoring scheduling skip-overs.
//! - **Admission**: per-source queued+in-flight cap (enforced where orders
//!   are produced) and per-node in-flight caps split by work kind.
//! - **Matching**: each tick classifies every pooled node, then scans the
//!   queue from the head per eligible node, buffering entries the node
//!   cannot take and restoring them in their original relative order.
//!   Skipped entries are simply revisited next tick; there is no stronger
//!   anti-starvation bound.

pub mod delegate;
pub mod queue;


pub use delegate::{classify_node, Eligibility, WorkDelegate};
pub use queue::WorkQueue;
