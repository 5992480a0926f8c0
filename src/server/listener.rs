//! Inbound listener and directive dispatch.
//!
//! Each accepted connection is handled by its own task, bounded by a
//! fixed-size semaphore. The task reads one line, decodes it expecting the
//! node-originated family, correlates it against the ledger and applies
//! the state transition for its directive. A line that fails to decode but
//! matches the console password opens the operator console instead.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::console;
use crate::protocol::{codec, Directive, MessageFamily, Transmission};
use crate::state::ClusterState;

/// How long a connection may take to produce its single line.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProtocolServer {
    state: Arc<ClusterState>,
}

impl ProtocolServer {
    pub fn new(state: Arc<ClusterState>) -> Self {
        Self { state }
    }

    /// Binds and serves until cancelled. A bind failure is returned to the
    /// caller, which treats it as process-fatal at startup.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let port = self.state.config.listen_port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to open listener socket on port {port}"))?;
        let pool = Arc::new(Semaphore::new(self.state.config.accept_pool_size));

        tracing::info!(
            "Protocol server listening on port {} ({} connection slots)",
            port,
            self.state.config.accept_pool_size
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Protocol server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let Ok(permit) = pool.clone().acquire_owned().await else {
                                return Ok(());
                            };
                            tracing::trace!("Accepted connection from {}", peer);
                            let state = self.state.clone();
                            tokio::spawn(async move {
                                handle_connection(state, stream, permit).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    state: Arc<ClusterState>,
    stream: TcpStream,
    _permit: OwnedSemaphorePermit,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let read = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)).await;
    match read {
        Ok(Ok(0)) => return,
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            tracing::warn!("Connection read failed: {}", e);
            return;
        }
        Err(_) => {
            tracing::warn!("Connection produced no line within the read timeout");
            return;
        }
    }

    if let Some(response) = codec::decode(&line, &state.envelope_key, MessageFamily::NodeOriginated)
    {
        handle_response(&state, &response);
        return;
    }

    if line.trim() == state.config.console_password {
        console::session(state, reader, write_half).await;
        return;
    }

    tracing::warn!("Dropping connection with undecodable payload");
}

/// Applies a decoded node response: ledger correlation, node state
/// transition and completion forwarding, per directive.
pub fn handle_response(state: &ClusterState, response: &Transmission) {
    let node_id = match response.node_id {
        Some(id) => id,
        None => {
            tracing::warn!(
                "Dropping {:?} response without a node id",
                response.directive
            );
            return;
        }
    };

    match response.directive {
        Directive::HandshakeSuccess => {
            if state.ledger.resolve(response).is_none() {
                log_unmatched(response, node_id);
                return;
            }
            match state.directory.get_node(node_id) {
                Some(node) => {
                    state.registry.mark_waiting(node.clone());
                    let mut persisted = node;
                    persisted.connection_status = crate::registry::ConnectionStatus::Success;
                    persisted.working = false;
                    state.directory.save_node(&persisted);
                }
                None => {
                    tracing::warn!(
                        "Handshake success from node {} unknown to the directory",
                        node_id
                    );
                }
            }
        }

        Directive::HandshakeFailure => {
            if state.ledger.resolve(response).is_none() {
                log_unmatched(response, node_id);
                return;
            }
            state.force_node_failure(node_id);
        }

        Directive::HandshakeAlreadyWorking => {
            if state.ledger.resolve(response).is_none() {
                log_unmatched(response, node_id);
            }
            // Node state deliberately unchanged.
        }

        Directive::WorkStartSuccess => {
            // The order's ledger entry stays open until the finish arrives.
            if !state.ledger.contains_match(response) {
                log_unmatched(response, node_id);
                return;
            }
            let description = state.ledger.describe_node_work(node_id);
            state.registry.mark_working(node_id, &description);
        }

        Directive::WorkRequestsExceeded => {
            match state.ledger.resolve(response) {
                Some(sent) => {
                    // Give the order back to the queue head for another node.
                    let mut order = sent.transmission;
                    order.node_id = None;
                    state.queue.offer_first(order);
                    tracing::info!(
                        "Node {} over its request limit; order returned to the queue head",
                        node_id
                    );
                }
                None => log_unmatched(response, node_id),
            }
        }

        Directive::WorkFinishSuccess | Directive::WorkFinishFailure => {
            let Some(sent) = state.ledger.resolve(response) else {
                log_unmatched(response, node_id);
                return;
            };
            let has_other = state.ledger.node_has_inflight_work(node_id);
            let description = state.ledger.describe_node_work(node_id);
            state.registry.work_finished(node_id, &description, has_other);
            state.applier.apply(response);

            if response.directive == Directive::WorkFinishFailure {
                if let Some(source_id) = response.source_id() {
                    let url_count = sent.transmission.urls.as_ref().map(Vec::len).unwrap_or(0);
                    if let Some(total) = state.record_order_failure(source_id, url_count) {
                        tracing::warn!(
                            "Source {} has {} failed work order(s) this run",
                            source_id,
                            total
                        );
                    }
                }
            }
        }

        Directive::WorkStartFailure => {
            let Some(sent) = state.ledger.resolve(response) else {
                log_unmatched(response, node_id);
                return;
            };
            state.applier.apply(response);
            if let Some(source_id) = response.source_id() {
                let url_count = sent.transmission.urls.as_ref().map(Vec::len).unwrap_or(0);
                state.record_order_failure(source_id, url_count);
            }
        }

        // Master-originated directives cannot pass the decode family check;
        // matched for exhaustiveness.
        Directive::Handshake
        | Directive::Shutdown
        | Directive::GatherAndBuild
        | Directive::DelegateIndex => {
            tracing::error!(
                "Master-originated {:?} reached the response handler; dropping",
                response.directive
            );
        }
    }
}

fn log_unmatched(response: &Transmission, node_id: i64) {
    // Usually a response racing a timeout sweep; recoverable by design.
    tracing::warn!(
        "Unmatched {:?} response from node {} (no ledger entry); ignoring",
        response.directive,
        node_id
    );
}
