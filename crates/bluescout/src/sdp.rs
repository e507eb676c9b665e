//! SDP client interface
//!
//! The SDP client owns the L2CAP plumbing and PDU handling for service
//! searches; the coordinator only asks it to run a search against one
//! service at a time and reads the resulting record set back as UUIDs.

use crate::constants::SDP_BUFFER_CAPACITY;
use crate::error::Error;
use crate::services::ServiceMask;
use crate::types::BdAddr;
use crate::uuid::Uuid;
use std::fmt;

/// Terminal status of one SDP transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpStatus {
    Success,
    /// The peer had no record for the searched service.
    NoRecords,
    /// The SDP channel could not be established.
    ConnectionFailed,
    /// The peer is busy; the transaction never ran.
    Busy,
}

impl SdpStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SdpStatus::Success)
    }
}

impl fmt::Display for SdpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpStatus::Success => write!(f, "Success"),
            SdpStatus::NoRecords => write!(f, "NoRecords"),
            SdpStatus::ConnectionFailed => write!(f, "ConnectionFailed"),
            SdpStatus::Busy => write!(f, "Busy"),
        }
    }
}

/// Discovery database the SDP client fills during one transaction.
///
/// Allocated when a discovery cycle starts and released when it finalizes;
/// results are never carried from one cycle into the next.
pub struct SdpBuffer {
    raw: Vec<u8>,
}

impl SdpBuffer {
    pub fn new() -> Self {
        Self {
            raw: Vec::with_capacity(SDP_BUFFER_CAPACITY),
        }
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.raw
    }
}

impl Default for SdpBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// SDP collaborator implemented by the embedder.
pub trait SdpBackend {
    /// Connects to the peer's SDP server (reusing the channel when already
    /// up) and searches for the given services, filling `db` with the raw
    /// records. The reply arrives as a `SdpReply` event.
    fn connect_and_search(
        &mut self,
        address: &BdAddr,
        services: ServiceMask,
        db: &mut SdpBuffer,
    ) -> Result<(), Error>;

    /// Service class UUIDs of the records produced by the most recent
    /// transaction.
    fn discovered_uuids(&self) -> Vec<Uuid>;
}
