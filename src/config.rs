//! Master Configuration
//!
//! Central knobs for the coordination core. Defaults mirror production
//! operation; `main.rs` overrides a handful of them from command-line
//! flags.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the protocol listener binds on.
    pub listen_port: u16,
    /// Shared secret the envelope key is expanded from.
    pub envelope_secret: String,
    /// Password gating the operator console sub-protocol.
    pub console_password: String,

    /// Maximum concurrently processed inbound connections.
    pub accept_pool_size: usize,

    /// Outbound delivery: connect timeout per attempt.
    pub connect_timeout: Duration,
    /// Outbound delivery: total attempts before giving up.
    pub delivery_attempts: usize,
    /// Outbound delivery: pause between attempts, before jitter.
    pub delivery_backoff: Duration,

    /// Per-node cap on concurrent in-flight GENERIC orders.
    pub max_generic_per_node: usize,
    /// Per-node cap on concurrent in-flight LISTING orders.
    pub max_listing_per_node: usize,

    /// Scheduler tick interval.
    pub delegate_interval: Duration,
    /// Aliveness handshake interval.
    pub aliveness_interval: Duration,
    /// Recruiter interval.
    pub recruiter_interval: Duration,
    /// Shutdown reconciler interval.
    pub shutdown_reconcile_interval: Duration,
    /// Timeout reconciler (ledger sweep) interval.
    pub timeout_reconcile_interval: Duration,

    /// Orchestrator: URLs per work order for non-delegation sources.
    pub order_batch_size: usize,
    /// Orchestrator: pause between delegation passes.
    pub delegation_interval: Duration,
    /// Orchestrator: emit a progress notification every this many passes.
    pub progress_every_passes: u32,
    /// Orchestrator: failed work orders tolerated before a run is aborted.
    pub max_failed_orders: u32,

    /// Shutdown: concurrent source finalizations.
    pub shutdown_finisher_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 9440,
            envelope_secret: "change-me-cluster-secret".to_string(),
            console_password: "change-me-console".to_string(),
            accept_pool_size: 64,
            connect_timeout: Duration::from_secs(5),
            delivery_attempts: 3,
            delivery_backoff: Duration::from_millis(250),
            max_generic_per_node: 4,
            max_listing_per_node: 1,
            delegate_interval: Duration::from_secs(5),
            aliveness_interval: Duration::from_secs(300),
            recruiter_interval: Duration::from_secs(20),
            shutdown_reconcile_interval: Duration::from_secs(20),
            timeout_reconcile_interval: Duration::from_secs(80),
            order_batch_size: 20,
            delegation_interval: Duration::from_secs(10),
            progress_every_passes: 30,
            max_failed_orders: 25,
            shutdown_finisher_concurrency: 4,
        }
    }
}
