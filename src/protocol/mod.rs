//! Wire Protocol
//!
//! Defines the closed set of directives exchanged between the master and
//! worker nodes, the `Transmission` envelope that carries them, and the
//! codec that serializes a transmission to a single encrypted base64 line.
//!
//! ## Responsibilities
//! - **Directives**: One enum variant per wire message, each carrying its
//!   message family, correlation classification and response timeout.
//! - **Envelope**: Canonical JSON field set (`node_id`, `directive`, `urls`,
//!   `details`, `data_source`).
//! - **Codec**: JSON -> AES-256-GCM (static shared key) -> base64. Decode
//!   failures never cross the wire boundary as errors.

pub mod codec;
pub mod types;


pub use types::{
    now_ms, status_reason, DataSourceSnapshot, Directive, MessageClass, MessageFamily, RunStats,
    SourceStatus, Transmission, WorkKind,
};
