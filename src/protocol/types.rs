use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which side of the cluster originates a directive.
///
/// The listener only ever accepts node-originated directives; the delivery
/// path only ever sends master-originated ones. Decoding validates the
/// family so a reflected or misrouted message is dropped at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFamily {
    MasterOriginated,
    NodeOriginated,
}

/// Correlation classification of a directive.
///
/// A response resolves the ledger entry of the request with the same
/// (node id, classification, data source) triple. All work-related
/// directives share the `Work` classification: the kind of the original
/// order (generic vs listing) is recovered from the ledger entry itself,
/// never from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Handshake,
    Shutdown,
    Work,
}

/// The two crawl strategies a work order can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    /// Single-shot gather-and-build for a batch of URLs.
    Generic,
    /// Multi-phase listing crawl seeded from base URLs.
    Listing,
}

/// The closed set of wire directives.
///
/// Master-originated: `Handshake`, `Shutdown` and the two work orders.
/// Node-originated: everything else. Each variant knows its family,
/// correlation classification, response expectation and timeout, so every
/// dispatch site (listener, scheduler, sweep) can match exhaustively
/// without an external table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Directive {
    Handshake,
    Shutdown,
    /// GENERIC work order: gather and build the carried URLs in one pass.
    GatherAndBuild,
    /// LISTING work order: produce a bounded self-contained result per base URL.
    DelegateIndex,

    HandshakeSuccess,
    HandshakeFailure,
    HandshakeAlreadyWorking,
    WorkStartSuccess,
    WorkStartFailure,
    WorkFinishSuccess,
    WorkFinishFailure,
    WorkRequestsExceeded,
}

impl Directive {
    pub fn family(&self) -> MessageFamily {
        match self {
            Directive::Handshake
            | Directive::Shutdown
            | Directive::GatherAndBuild
            | Directive::DelegateIndex => MessageFamily::MasterOriginated,
            Directive::HandshakeSuccess
            | Directive::HandshakeFailure
            | Directive::HandshakeAlreadyWorking
            | Directive::WorkStartSuccess
            | Directive::WorkStartFailure
            | Directive::WorkFinishSuccess
            | Directive::WorkFinishFailure
            | Directive::WorkRequestsExceeded => MessageFamily::NodeOriginated,
        }
    }

    pub fn class(&self) -> MessageClass {
        match self {
            Directive::Handshake
            | Directive::HandshakeSuccess
            | Directive::HandshakeFailure
            | Directive::HandshakeAlreadyWorking => MessageClass::Handshake,
            Directive::Shutdown => MessageClass::Shutdown,
            Directive::GatherAndBuild
            | Directive::DelegateIndex
            | Directive::WorkStartSuccess
            | Directive::WorkStartFailure
            | Directive::WorkFinishSuccess
            | Directive::WorkFinishFailure
            | Directive::WorkRequestsExceeded => MessageClass::Work,
        }
    }

    /// Whether a dispatched transmission with this directive gets a ledger
    /// entry and is expected to be answered on a fresh connection.
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Directive::Handshake | Directive::GatherAndBuild | Directive::DelegateIndex
        )
    }

    /// How long the ledger waits for a response before the sweep gives up.
    pub fn timeout(&self) -> Duration {
        match self {
            Directive::Handshake => Duration::from_secs(90),
            Directive::Shutdown => Duration::from_secs(30),
            Directive::GatherAndBuild => Duration::from_secs(30 * 60),
            Directive::DelegateIndex => Duration::from_secs(60 * 60),
            // Node-originated directives are never waited on.
            _ => Duration::from_secs(90),
        }
    }

    pub fn work_kind(&self) -> Option<WorkKind> {
        match self {
            Directive::GatherAndBuild => Some(WorkKind::Generic),
            Directive::DelegateIndex => Some(WorkKind::Listing),
            _ => None,
        }
    }

    pub fn is_work_order(&self) -> bool {
        self.work_kind().is_some()
    }
}

/// Mutable lifecycle status of a data source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Running,
    Staged,
    Disabled,
    Failed,
}

/// Run statistics accumulated over a crawl run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStats {
    pub urls_gathered: u64,
    pub urls_built: u64,
    pub urls_failed: u64,
    pub bytes_downloaded: u64,
    pub run_duration_ms: u64,
}

/// The subset of a data source the core reads and writes on the wire.
///
/// Owned by persistence; the master only carries it inside transmissions
/// and applies the status/statistics fields coming back from nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceSnapshot {
    pub id: i64,
    pub url: String,
    pub asset_type_id: i64,
    pub data_source_type_id: i64,
    pub proxy_mode: bool,
    pub agent_mode: bool,
    /// Minimum delay between fetches on the node side, in milliseconds.
    pub crawl_rate: u64,
    pub status: SourceStatus,
    pub status_reason: Option<String>,
    pub datasource_details: Option<String>,
    /// Bot class name used to look up the seed-URL capability.
    pub bot_class: String,
    /// Index-delegation mode: nodes produce a self-contained result per base URL.
    pub index_only: bool,
    /// Batch size for index-delegation orders.
    pub index_del_size: u32,
    /// Creation time, epoch milliseconds.
    pub created: i64,
    pub days_between_runs: u32,
    pub failed_attempts: u32,
    /// Cap on queued + in-flight work orders for this source.
    pub max_queued_orders: u32,
    #[serde(default)]
    pub stats: RunStats,
}

/// Status reasons written back to persistence on abnormal run endings.
pub mod status_reason {
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const SHUTDOWN: &str = "SHUTDOWN";
    pub const FAILURE_BUDGET: &str = "FAILURE_BUDGET";
}

/// The wire envelope: a tagged directive plus optional payload fields.
///
/// Canonical field set per the protocol: `node_id`, `directive`, `urls`,
/// `details`, `data_source`. Identity for correlation purposes is the
/// (node id, classification, data source) triple, which `PartialEq`
/// implements directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transmission {
    pub directive: Directive,
    pub node_id: Option<i64>,
    pub urls: Option<Vec<String>>,
    pub details: Option<String>,
    pub data_source: Option<DataSourceSnapshot>,
}

impl Transmission {
    pub fn new(directive: Directive) -> Self {
        Self {
            directive,
            node_id: None,
            urls: None,
            details: None,
            data_source: None,
        }
    }

    pub fn with_node(mut self, node_id: i64) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = Some(urls);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: DataSourceSnapshot) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn class(&self) -> MessageClass {
        self.directive.class()
    }

    pub fn source_id(&self) -> Option<i64> {
        self.data_source.as_ref().map(|s| s.id)
    }

    pub fn work_kind(&self) -> Option<WorkKind> {
        self.directive.work_kind()
    }

    /// Whether this transmission correlates with `other`: same node, same
    /// classification, same data source.
    pub fn correlates_with(&self, other: &Transmission) -> bool {
        self.node_id == other.node_id
            && self.class() == other.class()
            && self.source_id() == other.source_id()
    }
}

impl PartialEq for Transmission {
    fn eq(&self, other: &Self) -> bool {
        self.correlates_with(other)
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
