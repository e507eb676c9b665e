//! Discovery coordinator and event dispatcher
//!
//! Owns the two discovery state machines and exposes the single entry point
//! every event goes through. Events are tagged; the dispatcher hands each one
//! to the state machine it belongs to, which acts on it according to its
//! current state. Processing is strictly one event at a time: handlers never
//! block, they issue requests to collaborators and return, and anything a
//! handler wants to happen next is posted back through the same path.

use crate::discovery::{
    DiscoverRequest, DiscoveryCallbacks, DiscoveryConfig, DiscoveryEvent, DiscoveryState,
    ServiceDiscovery,
};
use crate::error::Error;
use crate::gatt::GattBackend;
use crate::inquiry::InquiryEngine;
use crate::sdp::SdpBackend;
use crate::search::{DeviceSearch, SearchCallback, SearchEvent, SearchState};
use crate::timer::TimerService;
use crate::types::{BdAddr, Transport};

/// A tagged event for the dispatcher. Each variant carries its own payload;
/// no two event kinds share storage.
pub enum Message {
    Search(SearchEvent),
    Discovery(DiscoveryEvent),
}

/// Entry point of the discovery subsystem.
///
/// Constructed once at stack startup with the collaborator implementations
/// and kept alive for the stack's lifetime. The device search and service
/// discovery machines are independent: each may be mid-cycle while the other
/// runs, but neither ever processes more than one event at a time.
pub struct DiscoveryCoordinator {
    search: DeviceSearch,
    discovery: ServiceDiscovery,
}

impl DiscoveryCoordinator {
    pub fn new(
        inquiry: Box<dyn InquiryEngine>,
        sdp: Box<dyn SdpBackend>,
        gatt: Box<dyn GattBackend>,
        timers: Box<dyn TimerService>,
    ) -> Self {
        Self::with_config(inquiry, sdp, gatt, timers, DiscoveryConfig::default())
    }

    pub fn with_config(
        inquiry: Box<dyn InquiryEngine>,
        sdp: Box<dyn SdpBackend>,
        gatt: Box<dyn GattBackend>,
        timers: Box<dyn TimerService>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            search: DeviceSearch::new(inquiry),
            discovery: ServiceDiscovery::new(sdp, gatt, timers, config),
        }
    }

    /// Begins a device search session reporting into `callback`. If a session
    /// is already running the request is buffered in the single pending slot,
    /// replacing whatever was buffered before, and starts when the running
    /// session completes.
    pub fn start_device_search(&mut self, callback: SearchCallback) -> Result<(), Error> {
        self.dispatch(Message::Search(SearchEvent::Start { callback }))
    }

    /// Requests cancellation of the running device search. Best effort and a
    /// no-op unless a search is active; the session still ends with its one
    /// completion callback.
    pub fn cancel_device_search(&mut self) -> Result<(), Error> {
        self.dispatch(Message::Search(SearchEvent::Cancel))
    }

    /// Requests service discovery against one peer. Runs immediately when the
    /// discovery machine is idle, otherwise joins the FIFO of deferred
    /// requests. Either way the request eventually yields exactly one result
    /// callback.
    pub fn discover(
        &mut self,
        address: BdAddr,
        callbacks: DiscoveryCallbacks,
        transport: Transport,
    ) -> Result<(), Error> {
        self.discover_request(DiscoverRequest::new(address, callbacks, transport))
    }

    /// Like [`discover`](Self::discover) but with full control over the
    /// requested service mask.
    pub fn discover_request(&mut self, request: DiscoverRequest) -> Result<(), Error> {
        self.dispatch(Message::Discovery(DiscoveryEvent::Discover(request)))
    }

    /// Registers the independent passive consumer of search completions. It
    /// survives across search sessions.
    pub fn register_passive_observer(&mut self, callback: SearchCallback) {
        self.search.register_passive_observer(callback);
    }

    /// Routes one tagged event, then any follow-up events it produced, in
    /// order, until the machines settle.
    pub fn dispatch(&mut self, message: Message) -> Result<(), Error> {
        match message {
            Message::Search(event) => {
                self.search.handle(event);
                Ok(())
            }
            Message::Discovery(event) => {
                let mut event = Some(event);
                while let Some(current) = event.take() {
                    event = self.discovery.handle(current)?;
                }
                Ok(())
            }
        }
    }

    pub fn search_state(&self) -> SearchState {
        self.search.state()
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    /// Number of deferred discovery requests waiting their turn.
    pub fn pending_discoveries(&self) -> usize {
        self.discovery.pending_requests()
    }
}
