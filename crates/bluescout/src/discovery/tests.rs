//! Unit tests for the service discovery state machine

use super::*;
use crate::error::Error;
use crate::gatt::{GattBackend, GattConnId, GattIf};
use crate::sdp::{SdpBackend, SdpBuffer, SdpStatus};
use crate::services::{found_services, service_uuid, ServiceId, ServiceMask};
use crate::timer::{Timer, TimerHandle, TimerService};
use crate::types::{BdAddr, DeviceType, DiscoveryStatus, HciStatus, Transport};
use crate::uuid::Uuid;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct SdpCalls {
    queries: Vec<(BdAddr, ServiceMask)>,
}

/// SDP client double. `records` is the service class set the simulated peer
/// actually exposes; a transaction yields whichever of them were searched.
struct MockSdp {
    calls: Arc<Mutex<SdpCalls>>,
    records: Vec<Uuid>,
    reject: bool,
}

impl SdpBackend for MockSdp {
    fn connect_and_search(
        &mut self,
        address: &BdAddr,
        services: ServiceMask,
        _db: &mut SdpBuffer,
    ) -> Result<(), Error> {
        if self.reject {
            return Err(Error::Rejected("sdp channel unavailable".into()));
        }
        self.calls.lock().unwrap().queries.push((*address, services));
        Ok(())
    }

    fn discovered_uuids(&self) -> Vec<Uuid> {
        let calls = self.calls.lock().unwrap();
        let Some((_, services)) = calls.queries.last().copied() else {
            return Vec::new();
        };
        self.records
            .iter()
            .copied()
            .filter(|uuid| {
                found_services(services, std::slice::from_ref(uuid)) != ServiceMask::empty()
            })
            .collect()
    }
}

#[derive(Default)]
struct GattCalls {
    registers: usize,
    opens: Vec<BdAddr>,
    reads: Vec<(u16, u8)>,
    closes: Vec<u16>,
}

struct MockGatt {
    calls: Arc<Mutex<GattCalls>>,
    next_conn: u16,
}

impl GattBackend for MockGatt {
    fn register(&mut self) -> GattIf {
        self.calls.lock().unwrap().registers += 1;
        GattIf(3)
    }

    fn open(&mut self, _client_if: GattIf, address: &BdAddr) -> GattConnId {
        self.next_conn += 1;
        self.calls.lock().unwrap().opens.push(*address);
        GattConnId(self.next_conn)
    }

    fn read_service_entry(&mut self, conn_id: GattConnId, index: u8) {
        self.calls.lock().unwrap().reads.push((conn_id.0, index));
    }

    fn close(&mut self, conn_id: GattConnId) {
        self.calls.lock().unwrap().closes.push(conn_id.0);
    }
}

#[derive(Default)]
struct TimerCalls {
    scheduled: Vec<(Duration, Timer, u64)>,
    cancelled: Vec<u64>,
    next_handle: u64,
}

struct MockTimers {
    calls: Arc<Mutex<TimerCalls>>,
}

impl TimerService for MockTimers {
    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerHandle {
        let mut calls = self.calls.lock().unwrap();
        calls.next_handle += 1;
        let handle = calls.next_handle;
        calls.scheduled.push((after, timer, handle));
        TimerHandle(handle)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.calls.lock().unwrap().cancelled.push(handle.0);
    }
}

struct Fixture {
    sdp: Arc<Mutex<SdpCalls>>,
    gatt: Arc<Mutex<GattCalls>>,
    timers: Arc<Mutex<TimerCalls>>,
}

fn discovery_against_peer(records: Vec<Uuid>, reject_sdp: bool) -> (ServiceDiscovery, Fixture) {
    let sdp = Arc::new(Mutex::new(SdpCalls::default()));
    let gatt = Arc::new(Mutex::new(GattCalls::default()));
    let timers = Arc::new(Mutex::new(TimerCalls::default()));
    let discovery = ServiceDiscovery::new(
        Box::new(MockSdp {
            calls: sdp.clone(),
            records,
            reject: reject_sdp,
        }),
        Box::new(MockGatt {
            calls: gatt.clone(),
            next_conn: 40,
        }),
        Box::new(MockTimers {
            calls: timers.clone(),
        }),
        DiscoveryConfig::default(),
    );
    (discovery, Fixture { sdp, gatt, timers })
}

/// Runs one event plus any follow-ups it posts, like the dispatcher does.
fn drive(discovery: &mut ServiceDiscovery, event: DiscoveryEvent) {
    let mut event = Some(event);
    while let Some(current) = event.take() {
        event = discovery.handle(current).expect("dispatch failed");
    }
}

fn recorder() -> (DiscoveryCallbacks, Arc<Mutex<Vec<ServiceDiscoveryResult>>>) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    (
        DiscoveryCallbacks::from_fn(move |result| {
            sink.lock().unwrap().push(result.clone());
        }),
        results,
    )
}

fn addr(n: u8) -> BdAddr {
    BdAddr::new([n, 0x66, 0x55, 0x44, 0x33, 0x22])
}

#[test]
fn classic_discovery_reports_only_the_services_the_peer_has() {
    let peer = BdAddr::parse("AA:BB:CC:DD:EE:FF").unwrap();
    let (mut discovery, fixture) =
        discovery_against_peer(vec![service_uuid(ServiceId::Hfp)], false);
    let (callbacks, results) = recorder();
    let requested = ServiceMask::OPP | ServiceMask::HFP;

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(peer, callbacks, Transport::Classic).with_services(requested),
        ),
    );
    assert_eq!(discovery.state(), DiscoveryState::Active);

    // One reply per requested service, in table order.
    drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });
    drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });

    assert_eq!(discovery.state(), DiscoveryState::Idle);
    let queries = fixture.sdp.lock().unwrap();
    assert_eq!(
        queries.queries,
        vec![(peer, ServiceMask::HFP), (peer, ServiceMask::OPP)]
    );
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.address, peer);
    assert_eq!(result.status, DiscoveryStatus::Success);
    assert_eq!(result.services, ServiceMask::HFP);
    assert_eq!(result.device_type, DeviceType::BrEdr);
    assert!(result.uuids.contains(&service_uuid(ServiceId::Hfp)));
}

#[test]
fn found_mask_is_always_a_subset_of_the_requested_mask() {
    let peer = addr(0x01);
    let (mut discovery, _fixture) = discovery_against_peer(
        vec![
            service_uuid(ServiceId::Spp),
            service_uuid(ServiceId::Hfp),
            service_uuid(ServiceId::A2dpSink),
        ],
        false,
    );
    let (callbacks, results) = recorder();
    let requested = ServiceMask::OPP | ServiceMask::HFP;

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(peer, callbacks, Transport::Classic).with_services(requested),
        ),
    );
    drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });
    drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].services & !requested, ServiceMask::empty());
    assert_eq!(results[0].services, ServiceMask::HFP);
}

#[test]
fn queued_requests_start_in_fifo_order_exactly_once_each() {
    let (b1, b2, b3) = (addr(0x01), addr(0x02), addr(0x03));
    let (mut discovery, fixture) =
        discovery_against_peer(vec![service_uuid(ServiceId::Spp)], false);
    let order = Arc::new(Mutex::new(Vec::new()));

    for peer in [b1, b2, b3] {
        let sink = order.clone();
        drive(
            &mut discovery,
            DiscoveryEvent::Discover(
                DiscoverRequest::new(
                    peer,
                    DiscoveryCallbacks::from_fn(move |result: &ServiceDiscoveryResult| {
                        sink.lock().unwrap().push(result.address);
                    }),
                    Transport::Classic,
                )
                .with_services(ServiceMask::SPP),
            ),
        );
    }
    assert_eq!(discovery.state(), DiscoveryState::Active);
    assert_eq!(discovery.pending_requests(), 2);

    // Each cycle needs one reply; finalizing one auto-starts the next.
    for _ in 0..3 {
        drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });
    }

    assert_eq!(discovery.state(), DiscoveryState::Idle);
    assert_eq!(discovery.pending_requests(), 0);
    assert_eq!(*order.lock().unwrap(), vec![b1, b2, b3]);
    let queried: Vec<BdAddr> = fixture
        .sdp
        .lock()
        .unwrap()
        .queries
        .iter()
        .map(|(a, _)| *a)
        .collect();
    assert_eq!(queried, vec![b1, b2, b3]);
}

#[test]
fn empty_request_mask_completes_immediately() {
    let peer = addr(0x04);
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);
    let (callbacks, results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(peer, callbacks, Transport::Classic)
                .with_services(ServiceMask::empty()),
        ),
    );

    assert_eq!(discovery.state(), DiscoveryState::Idle);
    assert!(fixture.sdp.lock().unwrap().queries.is_empty());
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DiscoveryStatus::Success);
    assert_eq!(results[0].services, ServiceMask::empty());
    // The cycle guard was armed and released.
    let timers = fixture.timers.lock().unwrap();
    assert_eq!(timers.scheduled.len(), 1);
    assert_eq!(timers.cancelled, vec![timers.scheduled[0].2]);
}

#[test]
fn sdp_protocol_failure_finalizes_with_failed_status() {
    let peer = addr(0x05);
    let (mut discovery, _fixture) =
        discovery_against_peer(vec![service_uuid(ServiceId::Hfp)], false);
    let (callbacks, results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(peer, callbacks, Transport::Classic)
                .with_services(ServiceMask::HFP | ServiceMask::OPP),
        ),
    );
    drive(
        &mut discovery,
        DiscoveryEvent::SdpReply {
            status: SdpStatus::ConnectionFailed,
        },
    );

    assert_eq!(discovery.state(), DiscoveryState::Idle);
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DiscoveryStatus::Failed);
}

#[test]
fn sdp_backend_rejection_finalizes_with_failed_status() {
    let peer = addr(0x06);
    let (mut discovery, _fixture) = discovery_against_peer(Vec::new(), true);
    let (callbacks, results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(peer, callbacks, Transport::Classic)
                .with_services(ServiceMask::SPP),
        ),
    );

    assert_eq!(discovery.state(), DiscoveryState::Idle);
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DiscoveryStatus::Failed);
}

#[test]
fn timeout_abandons_the_peer_and_starts_the_next_request() {
    let (b1, b2) = (addr(0x07), addr(0x08));
    let (mut discovery, fixture) =
        discovery_against_peer(vec![service_uuid(ServiceId::Spp)], false);
    let (first_callbacks, first_results) = recorder();
    let (second_callbacks, second_results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(b1, first_callbacks, Transport::Classic)
                .with_services(ServiceMask::SPP),
        ),
    );
    drive(
        &mut discovery,
        DiscoveryEvent::Discover(
            DiscoverRequest::new(b2, second_callbacks, Transport::Classic)
                .with_services(ServiceMask::SPP),
        ),
    );

    {
        let timers = fixture.timers.lock().unwrap();
        assert_eq!(
            timers.scheduled[0],
            (
                DiscoveryConfig::default().discovery_timeout,
                Timer::Discovery,
                1
            )
        );
    }

    // The peer never answers; the guard fires.
    drive(&mut discovery, DiscoveryEvent::DiscoveryTimeout);

    {
        let first = first_results.lock().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, DiscoveryStatus::Timeout);
    }
    // The queued request started without any external trigger.
    assert_eq!(discovery.state(), DiscoveryState::Active);
    assert_eq!(fixture.sdp.lock().unwrap().queries.last().unwrap().0, b2);

    drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });
    let second = second_results.lock().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].status, DiscoveryStatus::Success);
}

#[test]
fn le_discovery_walks_the_remote_service_table() {
    let peer = addr(0x09);
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);
    let (callbacks, results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );

    {
        let gatt = fixture.gatt.lock().unwrap();
        assert_eq!(gatt.registers, 1);
        assert_eq!(gatt.opens, vec![peer]);
        assert_eq!(gatt.reads, vec![(41, 0)]);
    }

    let battery = Uuid::from_u16(0x180F);
    drive(
        &mut discovery,
        DiscoveryEvent::GattServiceFound {
            address: peer,
            uuid: service_uuid(ServiceId::Gatt),
        },
    );
    drive(
        &mut discovery,
        DiscoveryEvent::GattServiceFound {
            address: peer,
            uuid: battery,
        },
    );
    drive(
        &mut discovery,
        DiscoveryEvent::GattComplete {
            address: peer,
            hci_status: HciStatus::SUCCESS,
        },
    );

    assert_eq!(discovery.state(), DiscoveryState::Idle);
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.status, DiscoveryStatus::Success);
    assert_eq!(result.device_type, DeviceType::Le);
    assert_eq!(result.uuids, vec![service_uuid(ServiceId::Gatt), battery]);
    assert!(result.services.contains(ServiceMask::GATT));

    let gatt = fixture.gatt.lock().unwrap();
    assert_eq!(gatt.reads, vec![(41, 0), (41, 1), (41, 2)]);
    // The link stays up for the close-delay window.
    assert!(gatt.closes.is_empty());
    let timers = fixture.timers.lock().unwrap();
    let armed: Vec<_> = timers
        .scheduled
        .iter()
        .filter(|(_, t, _)| *t == Timer::GattClose)
        .collect();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].0, DiscoveryConfig::default().gatt_close_delay);
}

#[test]
fn rediscovering_the_same_peer_within_the_close_window_reuses_the_connection() {
    let peer = addr(0x0A);
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);
    let (callbacks, _results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );
    drive(
        &mut discovery,
        DiscoveryEvent::GattComplete {
            address: peer,
            hci_status: HciStatus::SUCCESS,
        },
    );
    assert_eq!(discovery.state(), DiscoveryState::Idle);

    let close_handle = {
        let timers = fixture.timers.lock().unwrap();
        timers
            .scheduled
            .iter()
            .find(|(_, t, _)| *t == Timer::GattClose)
            .unwrap()
            .2
    };

    // Back-to-back query against the same peer, inside the window.
    let (callbacks, results) = recorder();
    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );

    {
        let gatt = fixture.gatt.lock().unwrap();
        assert_eq!(gatt.opens.len(), 1);
        assert_eq!(gatt.registers, 1);
        assert!(gatt.closes.is_empty());
        // The walk restarted on the same connection id.
        assert_eq!(gatt.reads.last(), Some(&(41, 0)));
    }
    assert!(fixture.timers.lock().unwrap().cancelled.contains(&close_handle));

    drive(
        &mut discovery,
        DiscoveryEvent::GattComplete {
            address: peer,
            hci_status: HciStatus::SUCCESS,
        },
    );
    assert_eq!(results.lock().unwrap().len(), 1);
}

#[test]
fn close_timer_expiry_closes_the_connection_and_clears_the_client() {
    let peer = addr(0x0B);
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);
    let (callbacks, _results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );
    drive(
        &mut discovery,
        DiscoveryEvent::GattComplete {
            address: peer,
            hci_status: HciStatus::SUCCESS,
        },
    );

    drive(&mut discovery, DiscoveryEvent::GattCloseTimeout);
    assert_eq!(fixture.gatt.lock().unwrap().closes, vec![41]);

    // The next cycle registers and opens from scratch.
    let (callbacks, _results) = recorder();
    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );
    let gatt = fixture.gatt.lock().unwrap();
    assert_eq!(gatt.registers, 2);
    assert_eq!(gatt.opens.len(), 2);
}

#[test]
fn discovering_a_different_peer_drops_the_held_connection_first() {
    let (first, second) = (addr(0x0C), addr(0x0D));
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);
    let (callbacks, _results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(first, callbacks, Transport::Le)),
    );
    drive(
        &mut discovery,
        DiscoveryEvent::GattComplete {
            address: first,
            hci_status: HciStatus::SUCCESS,
        },
    );

    let (callbacks, _results) = recorder();
    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(second, callbacks, Transport::Le)),
    );

    let gatt = fixture.gatt.lock().unwrap();
    assert_eq!(gatt.closes, vec![41]);
    assert_eq!(gatt.opens, vec![first, second]);
}

#[test]
fn le_timeout_still_defers_the_connection_close() {
    let peer = addr(0x0E);
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);
    let (callbacks, results) = recorder();

    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );
    drive(&mut discovery, DiscoveryEvent::DiscoveryTimeout);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DiscoveryStatus::Timeout);
    let gatt = fixture.gatt.lock().unwrap();
    assert!(gatt.closes.is_empty());
    drop(gatt);

    drive(&mut discovery, DiscoveryEvent::GattCloseTimeout);
    assert_eq!(fixture.gatt.lock().unwrap().closes, vec![41]);
}

#[test]
fn events_for_the_wrong_peer_or_wrong_state_are_ignored() {
    let (peer, other) = (addr(0x0F), addr(0x10));
    let (mut discovery, fixture) = discovery_against_peer(Vec::new(), false);

    // Replies with nothing in flight are discarded.
    drive(&mut discovery, DiscoveryEvent::SdpReply { status: SdpStatus::Success });
    drive(&mut discovery, DiscoveryEvent::DiscoveryTimeout);
    assert_eq!(discovery.state(), DiscoveryState::Idle);

    let (callbacks, results) = recorder();
    drive(
        &mut discovery,
        DiscoveryEvent::Discover(DiscoverRequest::new(peer, callbacks, Transport::Le)),
    );
    let reads_before = fixture.gatt.lock().unwrap().reads.len();
    drive(
        &mut discovery,
        DiscoveryEvent::GattServiceFound {
            address: other,
            uuid: Uuid::from_u16(0x180F),
        },
    );
    drive(
        &mut discovery,
        DiscoveryEvent::GattComplete {
            address: other,
            hci_status: HciStatus::SUCCESS,
        },
    );
    assert_eq!(fixture.gatt.lock().unwrap().reads.len(), reads_before);
    assert_eq!(discovery.state(), DiscoveryState::Active);
    assert!(results.lock().unwrap().is_empty());
}

#[test]
fn service_result_with_no_cycle_in_flight_is_an_invariant_breach() {
    let (mut discovery, _fixture) = discovery_against_peer(Vec::new(), false);
    let bogus = ServiceDiscoveryResult {
        address: addr(0x11),
        services: ServiceMask::empty(),
        device_type: DeviceType::BrEdr,
        uuids: Vec::new(),
        status: DiscoveryStatus::Success,
        hci_status: HciStatus::SUCCESS,
    };
    let outcome = discovery.handle(DiscoveryEvent::ServiceResult(bogus));
    assert!(matches!(outcome, Err(Error::MissingPeerContext)));
}
