//! GATT client interface
//!
//! The GATT client owns connection setup and attribute plumbing. The
//! coordinator walks a connected peer's service table one entry at a time;
//! each entry re-enters as `DiscoveryEvent::GattServiceFound` and exhaustion
//! as `DiscoveryEvent::GattComplete`.

use crate::types::BdAddr;
use std::fmt;

/// Client interface id handed out by `GattBackend::register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattIf(pub u8);

/// Identifier of one open GATT connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattConnId(pub u16);

impl fmt::Display for GattConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn {}", self.0)
    }
}

/// GATT collaborator implemented by the embedder.
pub trait GattBackend {
    /// Registers a client interface. Called before the first open and again
    /// whenever a delayed close has torn the previous registration down.
    fn register(&mut self) -> GattIf;

    /// Opens (or starts opening) a connection to the peer and returns its id.
    fn open(&mut self, client_if: GattIf, address: &BdAddr) -> GattConnId;

    /// Requests the service table entry at `index`. The reply is a
    /// `GattServiceFound` event, or `GattComplete` once `index` is past the
    /// end of the table.
    fn read_service_entry(&mut self, conn_id: GattConnId, index: u8);

    fn close(&mut self, conn_id: GattConnId);
}
