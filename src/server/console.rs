//! Operator console.
//!
//! A plaintext line sub-protocol on the listener: the first line of the
//! connection must equal the console password, after which `stats`,
//! `nodes`, `shutdown` and `exit` are accepted until the connection
//! closes.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::state::ClusterState;

pub async fn session(
    state: Arc<ClusterState>,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
) {
    tracing::info!("Console session opened");
    if write_line(&mut writer, "console ready").await.is_err() {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Console read failed: {}", e);
                break;
            }
        }

        let outcome = match line.trim() {
            "stats" => write_line(&mut writer, &render_stats(&state)).await,
            "nodes" => write_line(&mut writer, &render_nodes(&state)).await,
            "shutdown" => {
                let _ = write_line(&mut writer, "shutting down").await;
                super::shutdown_cluster(&state).await;
                std::process::exit(0);
            }
            "exit" => break,
            other => write_line(&mut writer, &format!("unknown command: {other}")).await,
        };

        if outcome.is_err() {
            break;
        }
    }
    tracing::info!("Console session closed");
}

async fn write_line(writer: &mut OwnedWriteHalf, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await
}

fn render_stats(state: &ClusterState) -> String {
    let (waiting, working) = state.registry.pool_counts();
    format!(
        "queued orders: {} | outstanding requests: {} | waiting nodes: {} | working nodes: {} | active runs: {}",
        state.queue.len(),
        state.ledger.len(),
        waiting,
        working,
        state.runs.len(),
    )
}

fn render_nodes(state: &ClusterState) -> String {
    let mut lines = Vec::new();
    for node in state.registry.waiting_nodes() {
        lines.push(format!("node {} {} waiting", node.id, node.endpoint()));
    }
    for node in state.registry.working_nodes() {
        lines.push(format!(
            "node {} {} working [{}]",
            node.id,
            node.endpoint(),
            node.work_description
        ));
    }
    if lines.is_empty() {
        return "no pooled nodes".to_string();
    }
    lines.sort();
    lines.join("\n")
}
