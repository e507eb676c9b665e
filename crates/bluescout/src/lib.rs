//! BlueScout - device and service discovery coordination for a Bluetooth host
//!
//! This library implements the state machines a Bluetooth host uses to find
//! nearby peers and to work out which application services a given peer
//! offers. Device search runs the inquiry procedure and resolves device names
//! one peer at a time; service discovery enumerates a peer's services over
//! classic SDP or, for low-energy peers, by walking its GATT service table.
//! Both machines live behind a single dispatcher that processes one tagged
//! event at a time, so asynchronous replies from the inquiry engine, SDP
//! client, GATT client and timer service can arrive in any order without
//! racing each other.
//!
//! The lower layers (HCI transport, SDP and ATT PDU handling, link timing)
//! are not part of this crate; embedders supply them by implementing the
//! collaborator traits and feeding replies back through
//! [`DiscoveryCoordinator::dispatch`].

pub mod constants;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod gatt;
pub mod inquiry;
pub mod sdp;
pub mod search;
pub mod services;
pub mod timer;
pub mod types;
pub mod uuid;

// Re-export common types for convenience
pub use coordinator::{DiscoveryCoordinator, Message};
pub use discovery::{
    DiscoverRequest, DiscoveryCallbacks, DiscoveryConfig, DiscoveryEvent, DiscoveryState,
    ServiceDiscoveryResult,
};
pub use error::Error;
pub use gatt::{GattBackend, GattConnId, GattIf};
pub use inquiry::InquiryEngine;
pub use sdp::{SdpBackend, SdpBuffer, SdpStatus};
pub use search::{SearchCallback, SearchEvent, SearchResult, SearchState};
pub use services::{
    found_services, service_from_uuid, service_manager_id, service_uuid, ServiceId, ServiceMask,
};
pub use timer::{Timer, TimerHandle, TimerService};
pub use types::{BdAddr, DeviceType, DiscoveryStatus, HciStatus, Transport};
pub use uuid::Uuid;
