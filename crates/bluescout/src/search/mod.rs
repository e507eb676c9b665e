//! Device search state machine
//!
//! Drives the inquiry lifecycle and, once the inquiry completes, resolves
//! the name of every discovered device one remote name request at a time.
//! A session delivers per-device results as names come in and exactly one
//! completion callback when it ends, whether it ran to the end, was
//! cancelled, or never got off the ground.

use crate::inquiry::InquiryEngine;
use crate::types::{BdAddr, HciStatus};
use log::{debug, info, warn};
use std::fmt;


/// Device search lifecycle.
///
/// `Cancelling` is reachable only from `Active`; both leave only through a
/// completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Active,
    Cancelling,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchState::Idle => write!(f, "IDLE"),
            SearchState::Active => write!(f, "ACTIVE"),
            SearchState::Cancelling => write!(f, "CANCELLING"),
        }
    }
}

/// What a search session reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// A discovered device whose name has been resolved.
    Device {
        address: BdAddr,
        name: String,
        hci_status: HciStatus,
    },
    /// The session is over; no further results will follow.
    Complete,
}

/// Consumer of search results. The session callback lives for one session;
/// the passive observer survives across sessions.
pub type SearchCallback = Box<dyn FnMut(&SearchResult) + Send>;

/// Tagged events routed to the device search state machine.
pub enum SearchEvent {
    Start {
        callback: SearchCallback,
    },
    Cancel,
    InquiryComplete {
        num_responses: u8,
    },
    RemoteName {
        address: BdAddr,
        name: String,
        hci_status: HciStatus,
    },
}

impl fmt::Display for SearchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchEvent::Start { .. } => write!(f, "Start"),
            SearchEvent::Cancel => write!(f, "Cancel"),
            SearchEvent::InquiryComplete { .. } => write!(f, "InquiryComplete"),
            SearchEvent::RemoteName { .. } => write!(f, "RemoteName"),
        }
    }
}

/// Control block and logic for the device search procedure.
pub struct DeviceSearch {
    state: SearchState,
    inquiry: Box<dyn InquiryEngine>,
    /// Callback owned for the duration of one session.
    search_callback: Option<SearchCallback>,
    /// Independent consumer notified of completions alongside the session.
    passive_observer: Option<SearchCallback>,
    /// Set once the name resolution phase has run out of devices.
    name_discover_done: bool,
    /// Peer a remote name request is outstanding for, if any.
    peer_bdaddr: Option<BdAddr>,
    /// Name of the peer most recently resolved.
    peer_name: String,
    /// Single buffered request; a later start replaces an earlier one.
    pending_search: Option<SearchCallback>,
}

impl DeviceSearch {
    pub(crate) fn new(inquiry: Box<dyn InquiryEngine>) -> Self {
        Self {
            state: SearchState::Idle,
            inquiry,
            search_callback: None,
            passive_observer: None,
            name_discover_done: false,
            peer_bdaddr: None,
            peer_name: String::new(),
            pending_search: None,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub(crate) fn register_passive_observer(&mut self, callback: SearchCallback) {
        self.passive_observer = Some(callback);
    }

    /// Routes one tagged event according to the current state.
    pub(crate) fn handle(&mut self, event: SearchEvent) {
        debug!("device search state {} event {}", self.state, event);
        match (self.state, event) {
            (SearchState::Idle, SearchEvent::Start { callback }) => self.start(callback),
            (_, SearchEvent::Start { callback }) => {
                // Single slot, last write wins.
                if self.pending_search.is_some() {
                    warn!("replacing previously buffered search request");
                }
                self.pending_search = Some(callback);
            }
            (SearchState::Active, SearchEvent::Cancel) => {
                self.state = SearchState::Cancelling;
                self.inquiry.cancel();
                // With a name request outstanding the final reply drives
                // finalization; otherwise the inquiry-complete event does.
                if self.peer_bdaddr.is_some() {
                    debug!("cancel deferred until outstanding name reply");
                }
            }
            (SearchState::Cancelling, SearchEvent::Cancel) => {
                debug!("cancel while already cancelling ignored");
            }
            (SearchState::Idle, SearchEvent::Cancel) => {
                debug!("cancel with no search in progress ignored");
            }
            (SearchState::Active, SearchEvent::InquiryComplete { num_responses }) => {
                debug!("inquiry complete with {} responses", num_responses);
                if !self.resolve_next_name() {
                    self.finalize();
                }
            }
            (SearchState::Cancelling, SearchEvent::InquiryComplete { .. }) => self.finalize(),
            (SearchState::Idle, SearchEvent::InquiryComplete { .. }) => {
                warn!("inquiry complete with no search in progress");
            }
            (
                SearchState::Active | SearchState::Cancelling,
                SearchEvent::RemoteName {
                    address,
                    name,
                    hci_status,
                },
            ) => self.on_remote_name(address, name, hci_status),
            (SearchState::Idle, SearchEvent::RemoteName { address, .. }) => {
                warn!("remote name reply from {} with no search in progress", address);
            }
        }
    }

    fn start(&mut self, callback: SearchCallback) {
        self.name_discover_done = false;
        self.search_callback = Some(callback);
        match self.inquiry.start() {
            Ok(()) => {
                self.state = SearchState::Active;
                info!("device search started");
            }
            Err(e) => {
                warn!("inquiry start failed: {}", e);
                self.finalize();
            }
        }
    }

    fn on_remote_name(&mut self, address: BdAddr, name: String, hci_status: HciStatus) {
        let Some(peer) = self.peer_bdaddr else {
            warn!("unexpected remote name reply from {}", address);
            return;
        };
        if peer != address {
            warn!(
                "stale remote name reply from {} while resolving {}",
                address, peer
            );
            return;
        }
        self.peer_bdaddr = None;
        self.peer_name = name;
        if hci_status.is_success() {
            let result = SearchResult::Device {
                address,
                name: self.peer_name.clone(),
                hci_status,
            };
            if let Some(callback) = self.search_callback.as_mut() {
                callback(&result);
            }
        } else {
            warn!("name request for {} failed: {}", address, hci_status);
        }
        match self.state {
            SearchState::Cancelling => {
                // No further devices are resolved after a cancel.
                self.name_discover_done = true;
                self.finalize();
            }
            _ => {
                if !self.resolve_next_name() {
                    self.finalize();
                }
            }
        }
    }

    /// Issues a name request for the next device still missing one. Returns
    /// false once the phase has run dry.
    fn resolve_next_name(&mut self) -> bool {
        if self.name_discover_done {
            return false;
        }
        match self.inquiry.next_unnamed_device() {
            Some(address) => {
                debug!("resolving name of {}", address);
                self.peer_bdaddr = Some(address);
                self.peer_name.clear();
                self.inquiry.request_name(&address);
                true
            }
            None => {
                self.name_discover_done = true;
                false
            }
        }
    }

    /// Ends the session: exactly one completion to the session callback,
    /// back to idle, then any buffered request starts immediately.
    fn finalize(&mut self) {
        info!("device search complete");
        if let Some(mut callback) = self.search_callback.take() {
            callback(&SearchResult::Complete);
        }
        if let Some(observer) = self.passive_observer.as_mut() {
            observer(&SearchResult::Complete);
        }
        self.state = SearchState::Idle;
        self.peer_bdaddr = None;
        if let Some(callback) = self.pending_search.take() {
            info!("starting buffered search request");
            self.start(callback);
        }
    }
}
