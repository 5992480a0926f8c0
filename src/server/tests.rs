//! Server Module Tests
//!
//! Drives the response dispatch table directly with decoded transmissions
//! and exercises the full shutdown sequence against the in-memory
//! persistence collaborators.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    use crate::bots::BotRegistry;
    use crate::config::Config;
    use crate::persistence::memory::{
        LogNotifier, MemoryNodeDirectory, MemorySourceStore, RecordingApplier, UrlState,
    };
    use crate::persistence::{NodeDirectory, SourceStore};
    use crate::protocol::{
        now_ms, DataSourceSnapshot, Directive, RunStats, SourceStatus, Transmission,
    };
    use crate::registry::{ConnectionStatus, WorkerNode};
    use crate::server::listener::handle_response;
    use crate::server::shutdown_cluster;
    use crate::state::ClusterState;

    struct Harness {
        state: Arc<ClusterState>,
        directory: Arc<MemoryNodeDirectory>,
        sources: Arc<MemorySourceStore>,
        applier: Arc<RecordingApplier>,
        notifier: Arc<LogNotifier>,
    }

    fn harness(config: Config) -> Harness {
        let directory = Arc::new(MemoryNodeDirectory::new());
        let sources = Arc::new(MemorySourceStore::new());
        let applier = Arc::new(RecordingApplier::new());
        let notifier = Arc::new(LogNotifier::new());
        let state = ClusterState::new(
            config,
            directory.clone(),
            sources.clone(),
            applier.clone(),
            notifier.clone(),
            BotRegistry::new(),
        );
        Harness {
            state,
            directory,
            sources,
            applier,
            notifier,
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

    fn response(directive: Directive, node_id: i64, source_id: i64) -> Transmission {
        Transmission::new(directive)
            .with_node(node_id)
            .with_source(source(source_id))
    }

    async fn tcp_sink() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if let Ok((mut stream, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let mut sink = Vec::new();
                        let _ = stream.read_to_end(&mut sink).await;
                    });
                }
            }
        });
        port
    }

    // ============================================================
    // TEST 1: Handshake responses
    // ============================================================

    #[test]
    fn test_handshake_success_pools_and_persists_the_node() {
        let h = harness(Config::default());
        let node = WorkerNode::new(1, "10.0.0.5", 9500);
        h.directory.save_node(&node);
        h.state
            .ledger
            .record(&Transmission::new(Directive::Handshake).with_node(1), now_ms());

        handle_response(&h.state, &Transmission::new(Directive::HandshakeSuccess).with_node(1));

        assert!(h.state.registry.is_waiting(1));
        assert!(h.state.ledger.is_empty());
        let persisted = h.directory.get_node(1).unwrap();
        assert_eq!(persisted.connection_status, ConnectionStatus::Success);
        assert!(!persisted.working);
    }

    #[test]
    fn test_handshake_failure_forces_node_failure() {
        let h = harness(Config::default());
        let node = WorkerNode::new(2, "10.0.0.6", 9500);
        h.directory.save_node(&node);
        h.state.registry.mark_waiting(node);
        h.state
            .ledger
            .record(&Transmission::new(Directive::Handshake).with_node(2), now_ms());

        handle_response(&h.state, &Transmission::new(Directive::HandshakeFailure).with_node(2));

        assert!(!h.state.registry.is_pooled(2));
        assert_eq!(
            h.directory.get_node(2).unwrap().connection_status,
            ConnectionStatus::Failure
        );
    }

    #[test]
    fn test_handshake_already_working_leaves_pools_untouched() {
        let h = harness(Config::default());
        h.state
            .ledger
            .record(&Transmission::new(Directive::Handshake).with_node(3), now_ms());

        handle_response(
            &h.state,
            &Transmission::new(Directive::HandshakeAlreadyWorking).with_node(3),
        );

        assert!(h.state.ledger.is_empty());
        assert!(!h.state.registry.is_pooled(3));
    }

    #[test]
    fn test_unmatched_response_is_dropped_without_effect() {
        let h = harness(Config::default());

        handle_response(&h.state, &response(Directive::WorkFinishSuccess, 9, 99));

        assert_eq!(h.applier.applied_count(), 0);
        assert!(!h.state.registry.is_pooled(9));
    }

    #[test]
    fn test_response_without_node_id_is_dropped() {
        let h = harness(Config::default());
        handle_response(&h.state, &Transmission::new(Directive::HandshakeSuccess));
        assert!(h.state.ledger.is_empty());
    }

    // ============================================================
    // TEST 2: Work order lifecycle
    // ============================================================

    #[test]
    fn test_order_lifecycle_from_start_to_finish() {
        let h = harness(Config::default());
        let node = WorkerNode::new(1, "10.0.0.5", 9500);
        h.state.registry.mark_waiting(node);

        let order = Transmission::new(Directive::GatherAndBuild)
            .with_node(1)
            .with_urls(vec!["https://site-10.test/a".into()])
            .with_source(source(10));
        h.state.ledger.record(&order, now_ms());
        h.state
            .registry
            .mark_working(1, &h.state.ledger.describe_node_work(1));

        // The start acknowledgement keeps the entry open.
        handle_response(&h.state, &response(Directive::WorkStartSuccess, 1, 10));
        assert_eq!(h.state.ledger.len(), 1);
        assert!(h.state.registry.is_working(1));

        // The finish resolves it and frees the node.
        handle_response(&h.state, &response(Directive::WorkFinishSuccess, 1, 10));
        assert!(h.state.ledger.is_empty());
        assert!(h.state.registry.is_waiting(1));
        assert_eq!(h.applier.applied_count(), 1);
        assert_eq!(
            h.applier.applied()[0].directive,
            Directive::WorkFinishSuccess
        );
    }

    #[test]
    fn test_finish_with_other_inflight_work_keeps_the_node_working() {
        let h = harness(Config::default());
        h.state.registry.mark_waiting(WorkerNode::new(1, "10.0.0.5", 9500));

        for sid in [10, 11] {
            let order = Transmission::new(Directive::GatherAndBuild)
                .with_node(1)
                .with_urls(vec![format!("https://site-{sid}.test/a")])
                .with_source(source(sid));
            h.state.ledger.record(&order, now_ms());
        }
        h.state
            .registry
            .mark_working(1, &h.state.ledger.describe_node_work(1));

        handle_response(&h.state, &response(Directive::WorkFinishSuccess, 1, 10));

        assert!(h.state.registry.is_working(1));
        assert_eq!(h.state.ledger.len(), 1);

        handle_response(&h.state, &response(Directive::WorkFinishSuccess, 1, 11));
        assert!(h.state.registry.is_waiting(1));
    }

    #[test]
    fn test_finish_failure_counts_toward_the_run_budget() {
        let h = harness(Config::default());
        h.state.registry.mark_waiting(WorkerNode::new(1, "10.0.0.5", 9500));
        h.state.register_run(10).unwrap();

        let order = Transmission::new(Directive::GatherAndBuild)
            .with_node(1)
            .with_urls(vec!["https://site-10.test/a".into()])
            .with_source(source(10));
        h.state.ledger.record(&order, now_ms());
        h.state.registry.mark_working(1, "site-10.test(10)");

        handle_response(&h.state, &response(Directive::WorkFinishFailure, 1, 10));

        assert_eq!(h.state.run_failed_orders(10), 1);
        // URL accounting comes from the resolved order, not the response.
        assert_eq!(h.state.run_failed_urls(10), 1);
        assert_eq!(h.applier.applied_count(), 1);
        assert!(h.state.registry.is_waiting(1));
    }

    #[test]
    fn test_start_failure_resolves_and_counts() {
        let h = harness(Config::default());
        h.state.register_run(12).unwrap();

        let order = Transmission::new(Directive::DelegateIndex)
            .with_node(4)
            .with_urls(vec!["https://site-12.test/a".into()])
            .with_source(source(12));
        h.state.ledger.record(&order, now_ms());

        handle_response(&h.state, &response(Directive::WorkStartFailure, 4, 12));

        assert!(h.state.ledger.is_empty());
        assert_eq!(h.state.run_failed_orders(12), 1);
        assert_eq!(h.state.run_failed_urls(12), 1);
        assert_eq!(h.applier.applied_count(), 1);
    }

    #[test]
    fn test_requests_exceeded_returns_the_order_to_the_head() {
        let h = harness(Config::default());
        h.state
            .queue
            .offer(Transmission::new(Directive::GatherAndBuild).with_source(source(20)));

        let order = Transmission::new(Directive::GatherAndBuild)
            .with_node(5)
            .with_urls(vec!["https://site-13.test/a".into(), "https://site-13.test/b".into()])
            .with_source(source(13));
        h.state.ledger.record(&order, now_ms());

        handle_response(&h.state, &response(Directive::WorkRequestsExceeded, 5, 13));

        assert!(h.state.ledger.is_empty());
        let head = h.state.queue.snapshot().remove(0);
        assert_eq!(head.source_id(), Some(13));
        assert_eq!(head.node_id, None);
        // The re-queued order kept its URL batch.
        assert_eq!(head.urls.as_deref().map(|u| u.len()), Some(2));
    }

    // ============================================================
    // TEST 3: Shutdown sequence
    // ============================================================

    #[tokio::test]
    async fn test_shutdown_fails_running_sources_and_releases_the_slot() {
        let h = harness(Config::default());
        h.directory.acquire_master_slot().unwrap();
        let port = tcp_sink().await;

        h.sources.insert_source(source(30));
        h.sources
            .register_urls(30, &["https://site-30.test/a".to_string()]);
        h.state.register_run(30).unwrap();

        let node = WorkerNode::new(1, "127.0.0.1", port);
        h.state.registry.mark_waiting(node);

        // One order queued, one in flight.
        h.state.queue.offer(
            Transmission::new(Directive::GatherAndBuild)
                .with_urls(vec!["https://site-30.test/a".into()])
                .with_source(source(30)),
        );
        h.state.ledger.record(
            &Transmission::new(Directive::GatherAndBuild)
                .with_node(1)
                .with_urls(vec!["https://site-30.test/b".into()])
                .with_source(source(30)),
            now_ms(),
        );

        shutdown_cluster(&h.state).await;

        assert!(h.state.shutdown_token.is_cancelled());
        let failed = h.sources.get_source(30).unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.status_reason.as_deref(), Some("SHUTDOWN"));

        // Queued and in-flight URLs were both marked for resume.
        assert_eq!(
            h.sources.url_state(30, "https://site-30.test/a"),
            Some(UrlState::NotRun)
        );
        assert_eq!(
            h.sources.url_state(30, "https://site-30.test/b"),
            Some(UrlState::NotRun)
        );

        // Last-known address persisted; master slot free again.
        assert!(h.directory.contains(1));
        assert!(h.directory.acquire_master_slot().is_ok());
        assert!(!h.notifier.sent().is_empty());
    }
}
