//! Service discovery state machine
//!
//! Enumerates the services of one peer at a time. Classic peers are walked
//! with sequential per-service SDP queries; low-energy peers by reading the
//! remote GATT service table entry by entry. Requests arriving while a cycle
//! is running are parked in a FIFO queue and started, in order, as earlier
//! cycles finalize. Every accepted request ends in exactly one consolidated
//! result callback: success, protocol failure or timeout.

use crate::error::Error;
use crate::gatt::{GattBackend, GattConnId, GattIf};
use crate::sdp::{SdpBackend, SdpBuffer, SdpStatus};
use crate::services::{found_services, ServiceId, ServiceMask};
use crate::timer::{Timer, TimerHandle, TimerService};
use crate::types::{BdAddr, DeviceType, DiscoveryStatus, HciStatus, Transport};
use crate::uuid::Uuid;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Service discovery lifecycle. One peer in flight at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Active,
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryState::Idle => write!(f, "IDLE"),
            DiscoveryState::Active => write!(f, "ACTIVE"),
        }
    }
}

/// Consolidated outcome of one discovery cycle.
#[derive(Debug, Clone)]
pub struct ServiceDiscoveryResult {
    pub address: BdAddr,
    /// Requested services confirmed present on the peer.
    pub services: ServiceMask,
    pub device_type: DeviceType,
    /// Every service class UUID seen during the cycle, requested or not.
    pub uuids: Vec<Uuid>,
    pub status: DiscoveryStatus,
    pub hci_status: HciStatus,
}

/// Callback bundle a caller registers with a discovery request.
pub struct DiscoveryCallbacks {
    pub on_result: Box<dyn FnMut(&ServiceDiscoveryResult) + Send>,
}

impl DiscoveryCallbacks {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(&ServiceDiscoveryResult) + Send + 'static,
    {
        Self {
            on_result: Box::new(f),
        }
    }
}

/// One discovery request as accepted from a caller.
pub struct DiscoverRequest {
    pub address: BdAddr,
    pub callbacks: DiscoveryCallbacks,
    pub services: ServiceMask,
    pub transport: Transport,
}

impl DiscoverRequest {
    /// A request against the full service table.
    pub fn new(address: BdAddr, callbacks: DiscoveryCallbacks, transport: Transport) -> Self {
        Self {
            address,
            callbacks,
            services: ServiceMask::all(),
            transport,
        }
    }

    pub fn with_services(mut self, services: ServiceMask) -> Self {
        self.services = services;
        self
    }
}

/// Tagged events routed to the service discovery state machine.
pub enum DiscoveryEvent {
    Discover(DiscoverRequest),
    SdpReply {
        status: SdpStatus,
    },
    GattServiceFound {
        address: BdAddr,
        uuid: Uuid,
    },
    GattComplete {
        address: BdAddr,
        hci_status: HciStatus,
    },
    /// Consolidated result posted back to the dispatcher by both the SDP and
    /// the GATT completion paths; handling it is what finalizes a cycle.
    ServiceResult(ServiceDiscoveryResult),
    DiscoveryTimeout,
    GattCloseTimeout,
}

impl fmt::Display for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::Discover(req) => write!(f, "Discover({})", req.address),
            DiscoveryEvent::SdpReply { status } => write!(f, "SdpReply({})", status),
            DiscoveryEvent::GattServiceFound { uuid, .. } => {
                write!(f, "GattServiceFound({})", uuid)
            }
            DiscoveryEvent::GattComplete { hci_status, .. } => {
                write!(f, "GattComplete({})", hci_status)
            }
            DiscoveryEvent::ServiceResult(result) => {
                write!(f, "ServiceResult({})", result.status)
            }
            DiscoveryEvent::DiscoveryTimeout => write!(f, "DiscoveryTimeout"),
            DiscoveryEvent::GattCloseTimeout => write!(f, "GattCloseTimeout"),
        }
    }
}

/// Timing knobs for the discovery state machine.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    /// Guard on one whole cycle; expiry abandons the peer with a timeout.
    pub discovery_timeout: Duration,
    /// Grace period a low-energy connection is kept open after finalize.
    pub gatt_close_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: crate::constants::DEFAULT_DISCOVERY_TIMEOUT,
            gatt_close_delay: crate::constants::DEFAULT_GATT_CLOSE_DELAY,
        }
    }
}

/// Outcome of trying to move the per-service SDP cursor forward.
enum SdpQuery {
    Issued,
    Exhausted,
    Rejected,
}

/// Control block and logic for the service discovery procedure.
pub struct ServiceDiscovery {
    state: DiscoveryState,
    sdp: Box<dyn SdpBackend>,
    gatt: Box<dyn GattBackend>,
    timers: Box<dyn TimerService>,
    config: DiscoveryConfig,

    /// Peer the active cycle runs against.
    peer_bdaddr: Option<BdAddr>,
    callbacks: Option<DiscoveryCallbacks>,
    transport: Transport,
    services_to_search: ServiceMask,
    services_found: ServiceMask,
    /// Per-cycle SDP database; dropped at finalize, never reused.
    sdp_buffer: Option<Box<SdpBuffer>>,
    discovery_timer: Option<TimerHandle>,
    /// Position in the fixed service table for sequential SDP queries.
    service_index: usize,
    pending_queue: VecDeque<DiscoverRequest>,
    /// At least one SDP transaction of this cycle produced records.
    sdp_results: bool,
    /// A finished low-energy cycle left its link open pending delayed close.
    wait_disc: bool,
    device_type: DeviceType,
    /// UUIDs accumulated over the cycle, from SDP records or GATT entries.
    peer_uuids: Vec<Uuid>,

    client_if: Option<GattIf>,
    conn_id: Option<GattConnId>,
    /// Index of the next remote GATT table entry to read.
    uuid_cursor: u8,
    gatt_close_timer: Option<TimerHandle>,
    /// Peer the close delay timer is armed for.
    pending_close_addr: Option<BdAddr>,
}

impl ServiceDiscovery {
    pub(crate) fn new(
        sdp: Box<dyn SdpBackend>,
        gatt: Box<dyn GattBackend>,
        timers: Box<dyn TimerService>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            state: DiscoveryState::Idle,
            sdp,
            gatt,
            timers,
            config,
            peer_bdaddr: None,
            callbacks: None,
            transport: Transport::Classic,
            services_to_search: ServiceMask::empty(),
            services_found: ServiceMask::empty(),
            sdp_buffer: None,
            discovery_timer: None,
            service_index: 0,
            pending_queue: VecDeque::new(),
            sdp_results: false,
            wait_disc: false,
            device_type: DeviceType::BrEdr,
            peer_uuids: Vec::new(),
            client_if: None,
            conn_id: None,
            uuid_cursor: 0,
            gatt_close_timer: None,
            pending_close_addr: None,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn pending_requests(&self) -> usize {
        self.pending_queue.len()
    }

    /// Routes one tagged event according to the current state. May hand back
    /// a follow-up event for the dispatcher to run next, which keeps every
    /// state change on the single dispatch path.
    pub(crate) fn handle(
        &mut self,
        event: DiscoveryEvent,
    ) -> Result<Option<DiscoveryEvent>, Error> {
        debug!("service discovery state {} event {}", self.state, event);
        match (self.state, event) {
            (DiscoveryState::Idle, DiscoveryEvent::Discover(request)) => self.start(request),
            (DiscoveryState::Active, DiscoveryEvent::Discover(request)) => {
                info!("discovery busy; queueing request for {}", request.address);
                self.pending_queue.push_back(request);
                Ok(None)
            }
            (DiscoveryState::Active, DiscoveryEvent::SdpReply { status }) => {
                self.on_sdp_reply(status)
            }
            (DiscoveryState::Active, DiscoveryEvent::GattServiceFound { address, uuid }) => {
                self.on_gatt_service_found(address, uuid)
            }
            (DiscoveryState::Active, DiscoveryEvent::GattComplete { address, hci_status }) => {
                self.on_gatt_complete(address, hci_status)
            }
            (DiscoveryState::Active, DiscoveryEvent::ServiceResult(result)) => {
                self.finalize(result)
            }
            (DiscoveryState::Idle, DiscoveryEvent::ServiceResult(_)) => {
                error!("service result with no discovery in flight");
                Err(Error::MissingPeerContext)
            }
            (DiscoveryState::Active, DiscoveryEvent::DiscoveryTimeout) => self.on_timeout(),
            (_, DiscoveryEvent::GattCloseTimeout) => self.on_gatt_close_timeout(),
            (state, event) => {
                warn!("event {} ignored in state {}", event, state);
                Ok(None)
            }
        }
    }

    /// Begins a cycle for `request`. Only called while idle.
    fn start(&mut self, request: DiscoverRequest) -> Result<Option<DiscoveryEvent>, Error> {
        info!(
            "service discovery for {} over {} services {:?}",
            request.address, request.transport, request.services
        );
        self.state = DiscoveryState::Active;
        self.peer_bdaddr = Some(request.address);
        self.callbacks = Some(request.callbacks);
        self.transport = request.transport;
        self.services_to_search = request.services;
        self.services_found = ServiceMask::empty();
        self.peer_uuids.clear();
        self.sdp_results = false;
        self.discovery_timer = Some(
            self.timers
                .schedule(self.config.discovery_timeout, Timer::Discovery),
        );

        match request.transport {
            Transport::Classic => {
                self.device_type = DeviceType::BrEdr;
                self.service_index = 0;
                self.sdp_buffer = Some(Box::new(SdpBuffer::new()));
                let followup = match self.issue_next_sdp_query()? {
                    SdpQuery::Issued => None,
                    SdpQuery::Exhausted => {
                        Some(self.build_result(DiscoveryStatus::Success, HciStatus::SUCCESS)?)
                    }
                    SdpQuery::Rejected => {
                        Some(self.build_result(DiscoveryStatus::Failed, HciStatus::SUCCESS)?)
                    }
                };
                Ok(followup.map(DiscoveryEvent::ServiceResult))
            }
            Transport::Le => {
                self.device_type = DeviceType::Le;
                let conn_id = self.acquire_gatt_connection(&request.address);
                self.uuid_cursor = 0;
                self.gatt.read_service_entry(conn_id, 0);
                Ok(None)
            }
        }
    }

    /// Reuses the connection the close delay timer is holding open when the
    /// new cycle targets the same peer; otherwise tears any leftover link
    /// down and opens a fresh one.
    fn acquire_gatt_connection(&mut self, address: &BdAddr) -> GattConnId {
        if let (Some(conn_id), Some(armed)) = (self.conn_id, self.pending_close_addr) {
            if armed == *address {
                if let Some(handle) = self.gatt_close_timer.take() {
                    self.timers.cancel(handle);
                }
                self.pending_close_addr = None;
                self.wait_disc = false;
                info!("reusing GATT connection to {}", address);
                return conn_id;
            }
        }
        self.drop_stale_gatt_link();
        let client_if = match self.client_if {
            Some(client_if) => client_if,
            None => {
                let client_if = self.gatt.register();
                self.client_if = Some(client_if);
                client_if
            }
        };
        let conn_id = self.gatt.open(client_if, address);
        self.conn_id = Some(conn_id);
        conn_id
    }

    /// Closes a connection held open for a different peer than the one a new
    /// cycle is about to target.
    fn drop_stale_gatt_link(&mut self) {
        if let Some(handle) = self.gatt_close_timer.take() {
            self.timers.cancel(handle);
        }
        if let Some(conn_id) = self.conn_id.take() {
            if let Some(stale) = self.pending_close_addr {
                debug!("closing GATT connection to {} before switching peers", stale);
            }
            self.gatt.close(conn_id);
        }
        self.pending_close_addr = None;
        self.wait_disc = false;
    }

    /// Advances the service cursor to the next requested service and issues
    /// an SDP query for it.
    fn issue_next_sdp_query(&mut self) -> Result<SdpQuery, Error> {
        let address = self.peer_bdaddr.ok_or(Error::MissingPeerContext)?;
        while self.service_index < ServiceId::COUNT {
            let id = ServiceId::ALL[self.service_index];
            if self.services_to_search.contains(id.mask()) {
                let db = self.sdp_buffer.as_mut().ok_or(Error::MissingSdpBuffer)?;
                debug!("sdp query for {} on {}", id, address);
                if let Err(e) = self.sdp.connect_and_search(&address, id.mask(), db) {
                    warn!("sdp query for {} rejected: {}", id, e);
                    return Ok(SdpQuery::Rejected);
                }
                return Ok(SdpQuery::Issued);
            }
            self.service_index += 1;
        }
        Ok(SdpQuery::Exhausted)
    }

    fn on_sdp_reply(&mut self, status: SdpStatus) -> Result<Option<DiscoveryEvent>, Error> {
        if !status.is_success() {
            warn!("sdp search failed: {}", status);
            let result = self.build_result(DiscoveryStatus::Failed, HciStatus::SUCCESS)?;
            return Ok(Some(DiscoveryEvent::ServiceResult(result)));
        }
        let discovered = self.sdp.discovered_uuids();
        if !discovered.is_empty() {
            self.sdp_results = true;
            self.services_found |= found_services(self.services_to_search, &discovered);
            for uuid in discovered {
                if !self.peer_uuids.contains(&uuid) {
                    self.peer_uuids.push(uuid);
                }
            }
        }
        self.service_index += 1;
        let followup = match self.issue_next_sdp_query()? {
            SdpQuery::Issued => None,
            SdpQuery::Exhausted => {
                debug!("sdp walk complete; records seen: {}", self.sdp_results);
                Some(self.build_result(DiscoveryStatus::Success, HciStatus::SUCCESS)?)
            }
            SdpQuery::Rejected => {
                Some(self.build_result(DiscoveryStatus::Failed, HciStatus::SUCCESS)?)
            }
        };
        Ok(followup.map(DiscoveryEvent::ServiceResult))
    }

    fn on_gatt_service_found(
        &mut self,
        address: BdAddr,
        uuid: Uuid,
    ) -> Result<Option<DiscoveryEvent>, Error> {
        if self.peer_bdaddr != Some(address) {
            warn!("gatt service from {} ignored; not the active peer", address);
            return Ok(None);
        }
        debug!("gatt service {} on {}", uuid, address);
        if !self.peer_uuids.contains(&uuid) {
            self.peer_uuids.push(uuid);
        }
        self.services_found |=
            found_services(self.services_to_search, std::slice::from_ref(&uuid));
        let conn_id = self.conn_id.ok_or(Error::MissingGattConnection)?;
        self.uuid_cursor = self.uuid_cursor.saturating_add(1);
        self.gatt.read_service_entry(conn_id, self.uuid_cursor);
        Ok(None)
    }

    fn on_gatt_complete(
        &mut self,
        address: BdAddr,
        hci_status: HciStatus,
    ) -> Result<Option<DiscoveryEvent>, Error> {
        if self.peer_bdaddr != Some(address) {
            warn!("gatt completion from {} ignored; not the active peer", address);
            return Ok(None);
        }
        debug!(
            "gatt walk of {} finished after {} entries",
            address, self.uuid_cursor
        );
        let status = if hci_status.is_success() {
            DiscoveryStatus::Success
        } else {
            DiscoveryStatus::Failed
        };
        let result = self.build_result(status, hci_status)?;
        Ok(Some(DiscoveryEvent::ServiceResult(result)))
    }

    fn on_timeout(&mut self) -> Result<Option<DiscoveryEvent>, Error> {
        self.discovery_timer = None;
        let address = self.peer_bdaddr.ok_or(Error::MissingPeerContext)?;
        warn!("service discovery for {} timed out", address);
        let result = self.build_result(DiscoveryStatus::Timeout, HciStatus::SUCCESS)?;
        Ok(Some(DiscoveryEvent::ServiceResult(result)))
    }

    /// Delayed GATT close. A reuse in the meantime cancels the timer, so a
    /// fire with nothing armed is just a late straggler.
    fn on_gatt_close_timeout(&mut self) -> Result<Option<DiscoveryEvent>, Error> {
        self.gatt_close_timer = None;
        if !self.wait_disc {
            debug!("gatt close timer fired with nothing to close");
            return Ok(None);
        }
        if let (Some(address), Some(conn_id)) = (self.pending_close_addr.take(), self.conn_id.take())
        {
            debug!("closing GATT connection to {}", address);
            self.gatt.close(conn_id);
        }
        self.client_if = None;
        self.wait_disc = false;
        Ok(None)
    }

    fn build_result(
        &self,
        status: DiscoveryStatus,
        hci_status: HciStatus,
    ) -> Result<ServiceDiscoveryResult, Error> {
        let address = self.peer_bdaddr.ok_or(Error::MissingPeerContext)?;
        Ok(ServiceDiscoveryResult {
            address,
            services: self.services_found,
            device_type: self.device_type,
            uuids: self.peer_uuids.clone(),
            status,
            hci_status,
        })
    }

    /// Ends the cycle: one result callback, per-cycle resources released,
    /// back to idle, then the queue head (if any) starts.
    fn finalize(&mut self, result: ServiceDiscoveryResult) -> Result<Option<DiscoveryEvent>, Error> {
        if self.peer_bdaddr.is_none() {
            return Err(Error::MissingPeerContext);
        }
        if let Some(handle) = self.discovery_timer.take() {
            self.timers.cancel(handle);
        }
        info!(
            "service discovery for {} complete: {} found {:?}",
            result.address, result.status, result.services
        );
        if let Some(mut callbacks) = self.callbacks.take() {
            (callbacks.on_result)(&result);
        }
        self.sdp_buffer = None;
        self.peer_bdaddr = None;
        self.services_to_search = ServiceMask::empty();
        self.services_found = ServiceMask::empty();
        self.peer_uuids.clear();
        self.service_index = 0;
        self.uuid_cursor = 0;
        self.sdp_results = false;
        self.state = DiscoveryState::Idle;

        // A low-energy link stays up for a moment in case the same peer is
        // queried again right away.
        if self.transport == Transport::Le && self.conn_id.is_some() {
            self.pending_close_addr = Some(result.address);
            self.wait_disc = true;
            self.gatt_close_timer = Some(
                self.timers
                    .schedule(self.config.gatt_close_delay, Timer::GattClose),
            );
        }

        if let Some(next) = self.pending_queue.pop_front() {
            info!("starting queued discovery for {}", next.address);
            return self.start(next);
        }
        Ok(None)
    }
}
