//! Protocol Server
//!
//! The master's single inbound endpoint: a bounded-concurrency TCP
//! listener. Every connection carries exactly one encrypted line from a
//! node (responses travel on fresh connections, never on the one the
//! request used), or opens the password-gated operator console.
//!
//! ## Submodules
//! - **`listener`**: accept loop, decode, ledger correlation and the
//!   directive dispatch table.
//! - **`delivery`**: outbound fresh-connection sends with bounded retries.
//! - **`console`**: the `stats` / `nodes` / `shutdown` / `exit` line
//!   console.

pub mod console;
pub mod delivery;
pub mod listener;

#[cfg(test)]
mod tests;

pub use listener::ProtocolServer;

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::protocol::status_reason;
use crate::protocol::SourceStatus;
use crate::state::ClusterState;

/// The full shutdown sequence.
///
/// Stop admitting work, signal every loop, tell the nodes, fail the
/// still-running sources through a bounded-concurrency finisher, persist
/// last-known node addresses and release the master's registry slot.
pub async fn shutdown_cluster(state: &Arc<ClusterState>) {
    tracing::info!("Shutdown sequence starting");

    let running = state.running_source_ids();

    state.cancel_all_runs();
    state.shutdown_token.cancel();

    let pooled = state.registry.pooled_nodes();
    for node in &pooled {
        delivery::send_shutdown(state, node).await;
    }
    tracing::info!("Shutdown broadcast to {} pooled node(s)", pooled.len());

    let finisher = Arc::new(Semaphore::new(
        state.config.shutdown_finisher_concurrency.max(1),
    ));
    let mut finishing = JoinSet::new();
    for source_id in running {
        let state = state.clone();
        let finisher = finisher.clone();
        finishing.spawn(async move {
            let _permit = finisher.acquire_owned().await;
            let mut urls = state
                .queue
                .drain_for_source(source_id)
                .into_iter()
                .flat_map(|t| t.urls.unwrap_or_default())
                .collect::<Vec<_>>();
            urls.extend(state.ledger.urls_for_source(source_id));
            state.sources.mark_not_run(source_id, &urls);
            state
                .sources
                .set_status(source_id, SourceStatus::Failed, Some(status_reason::SHUTDOWN));
            state.notifier.notify(
                "source run interrupted",
                &format!("source {} marked failed: master shutdown", source_id),
            );
        });
    }
    while finishing.join_next().await.is_some() {}

    for node in &pooled {
        state.directory.save_node(node);
    }

    state.directory.release_master_slot();
    tracing::info!("Shutdown sequence complete");
}
