//! Housekeeping Module Tests
//!
//! Exercises the synchronous reconciliation passes: the ledger timeout
//! sweep with its per-directive policy, and the directory-driven shutdown
//! reconciler with its synthesized completion failures.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::bots::BotRegistry;
    use crate::config::Config;
    use crate::housekeeping::Housekeeping;
    use crate::persistence::memory::{
        LogNotifier, MemoryNodeDirectory, MemorySourceStore, RecordingApplier,
    };
    use crate::persistence::{NodeDirectory, SourceStore};
    use crate::protocol::{
        DataSourceSnapshot, Directive, RunStats, SourceStatus, Transmission,
    };
    use crate::registry::{ConnectionStatus, WorkerNode};
    use crate::state::ClusterState;

    struct Harness {
        state: Arc<ClusterState>,
        service: Arc<Housekeeping>,
        directory: Arc<MemoryNodeDirectory>,
        sources: Arc<MemorySourceStore>,
        applier: Arc<RecordingApplier>,
    }

    fn harness() -> Harness {
        let directory = Arc::new(MemoryNodeDirectory::new());
        let sources = Arc::new(MemorySourceStore::new());
        let applier = Arc::new(RecordingApplier::new());
        let state = ClusterState::new(
            Config::default(),
            directory.clone(),
            sources.clone(),
            applier.clone(),
            Arc::new(LogNotifier::new()),
            BotRegistry::new(),
        );
        let service = Housekeeping::new(state.clone());
        Harness {
            state,
            service,
            directory,
            sources,
            applier,
        }
    }

    fn source(id: i64) -> DataSourceSnapshot {
        DataSourceSnapshot {
            id,
            url: format!("https://site-{id}.test"),
            asset_type_id: 1,
            data_source_type_id: 1,
            proxy_mode: false,
            agent_mode: false,
            crawl_rate: 0,
            status: SourceStatus::Running,
            status_reason: None,
            datasource_details: None,
            bot_class: "TestBot".to_string(),
            index_only: false,
            index_del_size: 5,
            created: 0,
            days_between_runs: 1,
            failed_attempts: 0,
            max_queued_orders: 4,
            stats: RunStats::default(),
        }
    }

    fn order(directive: Directive, node_id: i64, source_id: i64) -> Transmission {
        Transmission::new(directive)
            .with_node(node_id)
            .with_urls(vec![format!("https://site-{source_id}.test/page")])
            .with_source(source(source_id))
    }

    // ============================================================
    // TEST 1: Timeout sweep policy
    // ============================================================

    #[test]
    fn test_timed_out_order_fails_the_source_and_synthesizes_a_failure() {
        let h = harness();
        h.sources.insert_source(source(10));
        h.state.register_run(10).unwrap();

        // Backdated to the epoch: long past the order timeout.
        h.state.ledger.record(&order(Directive::GatherAndBuild, 1, 10), 0);

        h.service.timeout_pass(u64::MAX);

        assert!(h.state.ledger.is_empty());
        // The swept order counts toward the run's failure budget.
        assert_eq!(h.state.run_failed_orders(10), 1);
        assert_eq!(h.state.run_failed_urls(10), 1);
        let failed = h.sources.get_source(10).unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.status_reason.as_deref(), Some("TIMEOUT"));

        let applied = h.applier.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].directive, Directive::WorkFinishFailure);
        assert_eq!(applied[0].node_id, Some(1));
        assert_eq!(applied[0].details.as_deref(), Some("TIMEOUT"));
        assert_eq!(applied[0].source_id(), Some(10));
    }

    #[test]
    fn test_timed_out_handshake_forces_node_failure() {
        let h = harness();
        let node = WorkerNode::new(2, "10.0.0.7", 9500);
        h.directory.save_node(&node);
        h.state.registry.mark_waiting(node);
        h.state
            .ledger
            .record(&Transmission::new(Directive::Handshake).with_node(2), 0);

        h.service.timeout_pass(u64::MAX);

        assert!(h.state.ledger.is_empty());
        assert!(!h.state.registry.is_pooled(2));
        assert_eq!(
            h.directory.get_node(2).unwrap().connection_status,
            ConnectionStatus::Failure
        );
        assert_eq!(h.applier.applied_count(), 0);
    }

    #[test]
    fn test_second_sweep_finds_nothing() {
        let h = harness();
        h.sources.insert_source(source(10));
        h.state.ledger.record(&order(Directive::GatherAndBuild, 1, 10), 0);

        h.service.timeout_pass(u64::MAX);
        assert_eq!(h.applier.applied_count(), 1);

        // A sweep racing the first one must not double-apply.
        h.service.timeout_pass(u64::MAX);
        assert_eq!(h.applier.applied_count(), 1);
    }

    #[test]
    fn test_unexpired_entries_survive_the_sweep() {
        let h = harness();
        h.sources.insert_source(source(10));
        let now = crate::protocol::now_ms();
        h.state
            .ledger
            .record(&order(Directive::GatherAndBuild, 1, 10), now);

        h.service.timeout_pass(now + 1000);

        assert_eq!(h.state.ledger.len(), 1);
        assert_eq!(h.applier.applied_count(), 0);
        assert_eq!(h.sources.get_source(10).unwrap().status, SourceStatus::Running);
    }

    // ============================================================
    // TEST 2: Shutdown reconciler
    // ============================================================

    #[test]
    fn test_unpersisted_working_node_is_dropped_with_synthesized_failures() {
        let h = harness();
        h.state.register_run(10).unwrap();
        h.state.register_run(11).unwrap();

        // Node 3 is pooled and working but was removed from the directory.
        let node = WorkerNode::new(3, "10.0.0.8", 9500);
        h.state.registry.mark_waiting(node);
        h.state.registry.mark_working(3, "site-10.test(10) | site-11.test(11)");
        h.state.ledger.record(&order(Directive::GatherAndBuild, 3, 10), 0);
        h.state.ledger.record(&order(Directive::DelegateIndex, 3, 11), 0);

        h.service.shutdown_reconcile_pass();

        assert!(!h.state.registry.is_pooled(3));
        assert!(h.state.ledger.is_empty());

        // Only the GENERIC order feeds its run's failure budget; the
        // listing order is resumed, not failed.
        assert_eq!(h.state.run_failed_orders(10), 1);
        assert_eq!(h.state.run_failed_orders(11), 0);

        // Exactly one synthesized failure, for the GENERIC order only;
        // the listing order is left to source-level resume.
        let applied = h.applier.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].directive, Directive::WorkFinishFailure);
        assert_eq!(applied[0].details.as_deref(), Some("SHUTDOWN"));
        assert_eq!(applied[0].source_id(), Some(10));
    }

    #[test]
    fn test_unpersisted_waiting_node_is_dropped_quietly() {
        let h = harness();
        h.state.registry.mark_waiting(WorkerNode::new(4, "10.0.0.9", 9500));
        h.state
            .ledger
            .record(&Transmission::new(Directive::Handshake).with_node(4), 0);

        h.service.shutdown_reconcile_pass();

        assert!(!h.state.registry.is_pooled(4));
        assert!(h.state.ledger.is_empty());
        assert_eq!(h.applier.applied_count(), 0);
    }

    #[test]
    fn test_persisted_nodes_are_left_alone() {
        let h = harness();
        let node = WorkerNode::new(5, "10.0.0.10", 9500);
        h.directory.save_node(&node);
        h.state.registry.mark_waiting(node);
        h.state.ledger.record(&order(Directive::GatherAndBuild, 5, 10), 0);

        h.service.shutdown_reconcile_pass();

        assert!(h.state.registry.is_waiting(5));
        assert_eq!(h.state.ledger.len(), 1);
    }
}
