//! Data-Source Run Orchestration
//!
//! One `SourceRun` per actively crawling source, living on its own task
//! for the lifetime of the run. The run produces work orders from the
//! source's seed URLs, feeds the queue while the per-source cap allows,
//! and ends in exactly one of: completion, cancellation (with URL resume
//! marking), or a failure-budget abort.
//!
//! `run_source_scheduler` is the slow companion loop that promotes staged
//! sources whose schedule interval has elapsed into fresh runs.

pub mod run;


pub use run::SourceRun;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::protocol::{now_ms, SourceStatus};
use crate::state::ClusterState;

/// Promotes due staged sources into active runs.
pub async fn run_source_scheduler(state: Arc<ClusterState>, token: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Source scheduler stopping");
                break;
            }
            _ = interval.tick() => {
                for mut source in state.sources.due_sources(now_ms()) {
                    if state.runs.contains_key(&source.id) {
                        continue;
                    }
                    tracing::info!("Source {} due; starting a run", source.id);
                    state.sources.set_status(source.id, SourceStatus::Running, None);
                    source.status = SourceStatus::Running;
                    source.status_reason = None;
                    SourceRun::spawn(state.clone(), source);
                }
            }
        }
    }
}
