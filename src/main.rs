use std::sync::Arc;

use crawl_cluster::bots::BotRegistry;
use crawl_cluster::config::Config;
use crawl_cluster::housekeeping::Housekeeping;
use crawl_cluster::orchestrator::{run_source_scheduler, SourceRun};
use crawl_cluster::persistence::memory::{
    LogNotifier, MemoryNodeDirectory, MemorySourceStore, RecordingApplier,
};
use crawl_cluster::persistence::NodeDirectory;
use crawl_cluster::scheduler::WorkDelegate;
use crawl_cluster::server::{shutdown_cluster, ProtocolServer};
use crawl_cluster::state::ClusterState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args.get(i + 1);
        match (flag, value) {
            ("--port", Some(v)) => config.listen_port = v.parse()?,
            ("--secret", Some(v)) => config.envelope_secret = v.clone(),
            ("--console-password", Some(v)) => config.console_password = v.clone(),
            _ => {
                eprintln!(
                    "Usage: {} [--port <port>] [--secret <shared-secret>] [--console-password <password>]",
                    args[0]
                );
                std::process::exit(2);
            }
        }
        i += 2;
    }

    if config.envelope_secret.is_empty() {
        anyhow::bail!("the shared secret must not be empty");
    }

    let directory = Arc::new(MemoryNodeDirectory::new());
    let sources = Arc::new(MemorySourceStore::new());
    let applier = Arc::new(RecordingApplier::new());
    let notifier = Arc::new(LogNotifier::new());
    let bots = BotRegistry::new();

    // Single master by design; a held slot is process-fatal.
    directory.acquire_master_slot()?;

    let state = ClusterState::new(config, directory, sources, applier, notifier, bots);

    Housekeeping::new(state.clone()).start(state.shutdown_token.child_token());

    let delegate = WorkDelegate::new(state.clone());
    tokio::spawn(delegate.run(state.shutdown_token.child_token()));
    tokio::spawn(run_source_scheduler(
        state.clone(),
        state.shutdown_token.child_token(),
    ));

    // Resume sources that were already marked running.
    for source in state.sources.running_sources() {
        SourceRun::spawn(state.clone(), source);
    }

    let server = ProtocolServer::new(state.clone());
    let mut server_handle = tokio::spawn(server.run(state.shutdown_token.child_token()));

    tokio::select! {
        result = &mut server_handle => {
            // The listener ending on its own means a startup failure.
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
            shutdown_cluster(&state).await;
            let _ = server_handle.await;
        }
    }

    Ok(())
}
