//! Housekeeping Loops
//!
//! Four independent periodic actors that reconcile the in-memory cluster
//! view against reality:
//!
//! - **Aliveness**: handshakes every pooled node plus persisted
//!   failure-status nodes, on a slow cadence.
//! - **Recruiter**: handshakes persisted nodes awaiting first contact.
//! - **Shutdown reconciler**: drops pooled nodes no longer present in the
//!   node directory and settles their in-flight work.
//! - **Timeout reconciler**: sweeps the sent-request ledger; the sweep is
//!   the sole source of truth for "node stopped responding".
//!
//! Every loop observes a cancellation token at its sleep, so shutdown
//! aborts both iteration and any blocking wait promptly.

pub mod service;

#[cfg(test)]
mod tests;

pub use service::Housekeeping;
