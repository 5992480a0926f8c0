//! Outbound Delivery
//!
//! Every message to a node travels on its own fresh TCP connection: one
//! encrypted line, then the connection is closed. The node answers later
//! on a connection it opens itself.
//!
//! Connect and write failures are retried a fixed number of times with a
//! short jittered backoff. What happens after the final failure depends on
//! the message: work orders go back to the queue head, handshakes force
//! the node into the failure state.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::protocol::{codec, now_ms, Directive, Transmission};
use crate::registry::WorkerNode;
use crate::state::ClusterState;

/// Single delivery attempt: connect, write the line, close.
async fn send_line(endpoint: &str, line: &str, connect_timeout: Duration) -> Result<()> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| anyhow!("connect to {} timed out", endpoint))??;

    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;
    Ok(())
}

/// Encodes and delivers a transmission with bounded retries.
pub async fn send_transmission(
    state: &ClusterState,
    endpoint: &str,
    transmission: &Transmission,
) -> Result<()> {
    let line = codec::encode(transmission, &state.envelope_key)?;

    let attempts = state.config.delivery_attempts.max(1);
    let mut delay = state.config.delivery_backoff;

    for attempt in 0..attempts {
        match send_line(endpoint, &line, state.config.connect_timeout).await {
            Ok(()) => {
                tracing::debug!(
                    "Delivered {:?} to {} (attempt {})",
                    transmission.directive,
                    endpoint,
                    attempt + 1
                );
                return Ok(());
            }
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(anyhow!(
                        "delivery of {:?} to {} failed after {} attempts: {}",
                        transmission.directive,
                        endpoint,
                        attempts,
                        e
                    ));
                }
                // Jitter to avoid hammering a recovering node in lockstep.
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                delay = (delay * 2).min(Duration::from_millis(1200));
            }
        }
    }

    Err(anyhow!("retry attempts exhausted"))
}

/// Dispatches a work order: ledger entry first, then delivery.
///
/// The entry is recorded before the bytes leave so a fast response on a
/// fresh inbound connection always finds something to correlate against.
/// On final delivery failure the entry is discarded and the error bubbles
/// to the scheduler, which returns the order to the queue head.
pub async fn dispatch_order(
    state: &ClusterState,
    node: &WorkerNode,
    order: &Transmission,
) -> Result<()> {
    state.ledger.record(order, now_ms());

    if let Err(e) = send_transmission(state, &node.endpoint(), order).await {
        state.ledger.discard(order);
        return Err(e);
    }
    Ok(())
}

/// Sends a handshake to a node and records the expectation.
///
/// Exhausted retries are an explicit failure transition for the node.
pub async fn send_handshake(state: &ClusterState, node: &WorkerNode) -> Result<()> {
    let handshake = Transmission::new(Directive::Handshake).with_node(node.id);

    state.ledger.record(&handshake, now_ms());

    if let Err(e) = send_transmission(state, &node.endpoint(), &handshake).await {
        state.ledger.discard(&handshake);
        tracing::warn!("Handshake delivery to node {} failed: {}", node.id, e);
        state.force_node_failure(node.id);
        return Err(e);
    }
    Ok(())
}

/// Fire-and-forget shutdown directive; no ledger entry, no retry pressure
/// beyond the standard attempts.
pub async fn send_shutdown(state: &ClusterState, node: &WorkerNode) {
    let shutdown = Transmission::new(Directive::Shutdown).with_node(node.id);
    if let Err(e) = send_transmission(state, &node.endpoint(), &shutdown).await {
        tracing::warn!("Shutdown delivery to node {} failed: {}", node.id, e);
    }
}
