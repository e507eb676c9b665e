//! Error types for the bluescout library
//!
//! Protocol-level failures (a peer that answers with an error, a timeout, a
//! cancelled search) are never surfaced here; they arrive as the status field
//! of the eventual result callback. This type covers the remaining cases: a
//! collaborator refusing a request outright, and internal invariant breaches.

use thiserror::Error;

/// Errors surfaced by the coordinator's fallible entry points
#[derive(Error, Debug)]
pub enum Error {
    /// A lower-layer collaborator refused a request the coordinator issued.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// A result was finalized while no discovery cycle was active.
    #[error("no peer context for the active discovery cycle")]
    MissingPeerContext,

    /// The per-cycle SDP buffer was gone while a query was outstanding.
    #[error("SDP buffer released while a query was outstanding")]
    MissingSdpBuffer,

    /// A GATT table walk was driven without an open connection.
    #[error("no GATT connection for the active discovery cycle")]
    MissingGattConnection,
}
