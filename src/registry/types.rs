use serde::{Deserialize, Serialize};

/// Result of the last connection attempt to a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unknown,
    Success,
    Failure,
}

/// A worker node as the master sees it.
///
/// Created by persistence; enters the registry pools on first successful
/// handshake. The `work_description` is free text and may name several
/// sources at once, since a node can work multiple sources concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: i64,
    pub address: String,
    pub port: u16,
    pub connection_status: ConnectionStatus,
    pub working: bool,
    pub work_description: String,
}

impl WorkerNode {
    pub fn new(id: i64, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            connection_status: ConnectionStatus::Unknown,
            working: false,
            work_description: String::new(),
        }
    }

    /// Socket address string used by the outbound delivery path.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
