//! Node Registry & Sent-Request Ledger
//!
//! The master's in-memory view of the cluster: which worker nodes exist,
//! which pool they sit in, and which dispatched requests are still waiting
//! for a response.
//!
//! ## Core Mechanisms
//! - **Pools**: A node is a member of at most one of {waiting, working};
//!   absence from both means disconnected or failed. Pool moves happen as
//!   remove+insert under a single coarse lock, so the invariant holds
//!   across any event sequence.
//! - **State machine**: handshake success -> waiting, work assigned ->
//!   working, work finished -> waiting once nothing else is in flight,
//!   explicit failure -> out of both pools. Invalid transitions are logged
//!   errors, never panics.
//! - **Ledger**: every response-expecting transmission gets exactly one
//!   entry at dispatch time, removed by exactly one of resolution or
//!   timeout sweep.

pub mod ledger;
pub mod nodes;
pub mod types;


pub use ledger::{SentRequest, SentRequestLedger};
pub use nodes::NodeRegistry;
pub use types::{ConnectionStatus, WorkerNode};
