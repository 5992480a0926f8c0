//! One crawl run for one data source.

use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::{
    now_ms, status_reason, DataSourceSnapshot, Directive, RunStats, SourceStatus, Transmission,
};
use crate::state::{ClusterState, RunHandle};

enum RunOutcome {
    Completed {
        total_urls: usize,
        dispatched_urls: u64,
    },
    Cancelled,
    BudgetExceeded(u32),
    SeedFailure(anyhow::Error),
}

pub struct SourceRun {
    state: Arc<ClusterState>,
    source: DataSourceSnapshot,
    handle: Arc<RunHandle>,
    run_id: Uuid,
}

impl SourceRun {
    /// Registers and spawns a run for the source. Returns `false` when the
    /// source already has an active run.
    pub fn spawn(state: Arc<ClusterState>, source: DataSourceSnapshot) -> bool {
        let Some(handle) = state.register_run(source.id) else {
            return false;
        };
        let run = SourceRun {
            state,
            source,
            handle,
            run_id: Uuid::new_v4(),
        };
        tokio::spawn(async move {
            run.run().await;
        });
        true
    }

    /// The work order directive and batch size for this source's mode.
    ///
    /// Index-delegation sources get self-contained LISTING orders sized by
    /// `index_del_size`; everything else gets GENERIC gather-and-build
    /// orders of the configured batch size.
    fn order_shape(&self) -> (Directive, usize) {
        if self.source.index_only {
            (
                Directive::DelegateIndex,
                self.source.index_del_size.max(1) as usize,
            )
        } else {
            (
                Directive::GatherAndBuild,
                self.state.config.order_batch_size.max(1),
            )
        }
    }

    async fn run(self) {
        let source_id = self.source.id;
        let started_ms = now_ms();
        tracing::info!(
            "Run {} starting for source {} ({})",
            self.run_id,
            source_id,
            self.source.url
        );

        match self.delegate_work().await {
            RunOutcome::Completed {
                total_urls,
                dispatched_urls,
            } => {
                let failed_urls = self.state.run_failed_urls(source_id) as u64;
                let stats = RunStats {
                    urls_gathered: total_urls as u64,
                    urls_built: dispatched_urls.saturating_sub(failed_urls),
                    urls_failed: failed_urls,
                    bytes_downloaded: self.source.stats.bytes_downloaded,
                    run_duration_ms: now_ms().saturating_sub(started_ms),
                };
                self.state.sources.record_run_stats(source_id, &stats);

                // A sweep or reconciler may have failed the source while the
                // run was draining; that verdict stands.
                let failed_mid_run = self
                    .state
                    .sources
                    .get_source(source_id)
                    .map(|s| s.status == SourceStatus::Failed)
                    .unwrap_or(false);
                if failed_mid_run {
                    self.state.notifier.notify(
                        "source run drained after failure",
                        &format!(
                            "run {} for source {} drained with {} failed url(s); failure verdict kept",
                            self.run_id, source_id, stats.urls_failed
                        ),
                    );
                } else {
                    self.state
                        .sources
                        .set_status(source_id, SourceStatus::Staged, None);
                    self.state.notifier.notify(
                        "source run completed",
                        &format!(
                            "run {} for source {} finished: {} urls gathered, {} built, {} failed",
                            self.run_id, source_id, stats.urls_gathered, stats.urls_built, stats.urls_failed
                        ),
                    );
                }
            }

            RunOutcome::Cancelled => {
                self.mark_outstanding_not_run();
                tracing::info!(
                    "Run {} for source {} cancelled; outstanding urls marked for resume",
                    self.run_id,
                    source_id
                );
            }

            RunOutcome::BudgetExceeded(failed) => {
                self.mark_outstanding_not_run();
                self.state.sources.set_status(
                    source_id,
                    SourceStatus::Disabled,
                    Some(status_reason::FAILURE_BUDGET),
                );
                self.state.notifier.notify(
                    "source run aborted",
                    &format!(
                        "run {} for source {} aborted after {} failed orders; source disabled",
                        self.run_id, source_id, failed
                    ),
                );
            }

            RunOutcome::SeedFailure(e) => {
                self.state.sources.set_status(
                    source_id,
                    SourceStatus::Failed,
                    Some(&e.to_string()),
                );
                self.state.notifier.notify(
                    "source run failed",
                    &format!("run {} for source {} failed to seed: {}", self.run_id, source_id, e),
                );
            }
        }

        self.state.unregister_run(source_id);
    }

    /// The delegation loop: feed the queue while the per-source cap
    /// allows, sleep, repeat until the backlog and the cluster both drain.
    async fn delegate_work(&self) -> RunOutcome {
        let source_id = self.source.id;

        let seeds = match self.state.bots.seed_urls(&self.source) {
            Ok(seeds) => seeds,
            Err(e) => return RunOutcome::SeedFailure(e),
        };
        self.state.sources.register_urls(source_id, &seeds);

        let total_urls = seeds.len();
        let mut pending: VecDeque<String> = seeds.into();
        let (directive, batch_size) = self.order_shape();
        let cap = self.source.max_queued_orders.max(1) as usize;

        let mut dispatched_urls: u64 = 0;
        let mut passes: u32 = 0;

        loop {
            if self.handle.token.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            while !pending.is_empty() && self.state.source_load(source_id) < cap {
                let take = batch_size.min(pending.len());
                let batch: Vec<String> = pending.drain(..take).collect();
                self.state.sources.mark_dispatched(source_id, &batch);
                dispatched_urls += batch.len() as u64;

                let order = Transmission::new(directive)
                    .with_urls(batch)
                    .with_source(self.source.clone());
                self.state.queue.offer(order);
            }

            if pending.is_empty() && self.state.source_load(source_id) == 0 {
                return RunOutcome::Completed {
                    total_urls,
                    dispatched_urls,
                };
            }

            let failed = self.state.run_failed_orders(source_id);
            if failed > self.state.config.max_failed_orders {
                return RunOutcome::BudgetExceeded(failed);
            }

            passes += 1;
            if self.state.config.progress_every_passes > 0
                && passes % self.state.config.progress_every_passes == 0
            {
                self.state.notifier.notify(
                    "source run progress",
                    &format!(
                        "run {} source {}: {}/{} urls dispatched ({} per order)",
                        self.run_id, source_id, dispatched_urls, total_urls, batch_size
                    ),
                );
            }

            tokio::select! {
                _ = self.handle.token.cancelled() => return RunOutcome::Cancelled,
                _ = tokio::time::sleep(self.state.config.delegation_interval) => {}
            }
        }
    }

    /// Collects this source's queued and in-flight URLs and marks them
    /// not-run so the next run resumes them.
    fn mark_outstanding_not_run(&self) {
        let source_id = self.source.id;
        let mut urls: Vec<String> = self
            .state
            .queue
            .drain_for_source(source_id)
            .into_iter()
            .flat_map(|t| t.urls.unwrap_or_default())
            .collect();
        urls.extend(self.state.ledger.urls_for_source(source_id));
        if !urls.is_empty() {
            self.state.sources.mark_not_run(source_id, &urls);
        }
    }
}
