use bluescout::{
    BdAddr, DiscoverRequest, DiscoveryCallbacks, DiscoveryCoordinator, DiscoveryEvent,
    DiscoveryState, Error, GattBackend, GattConnId, GattIf, InquiryEngine, Message, SdpBackend,
    SdpBuffer, SdpStatus, ServiceId, ServiceMask, Timer, TimerHandle, TimerService, Transport,
    Uuid,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulated SDP client: each peer exposes a fixed record set, and a search
/// yields whichever of the searched services the peer actually has.
struct DemoSdp {
    peers: Vec<(BdAddr, Vec<Uuid>)>,
    last_query: Arc<Mutex<Option<(BdAddr, ServiceMask)>>>,
}

impl SdpBackend for DemoSdp {
    fn connect_and_search(
        &mut self,
        address: &BdAddr,
        services: ServiceMask,
        _db: &mut SdpBuffer,
    ) -> Result<(), Error> {
        *self.last_query.lock().unwrap() = Some((*address, services));
        Ok(())
    }

    fn discovered_uuids(&self) -> Vec<Uuid> {
        let Some((address, services)) = *self.last_query.lock().unwrap() else {
            return Vec::new();
        };
        let Some((_, records)) = self.peers.iter().find(|(a, _)| *a == address) else {
            return Vec::new();
        };
        records
            .iter()
            .copied()
            .filter(|uuid| {
                bluescout::found_services(services, std::slice::from_ref(uuid))
                    != ServiceMask::empty()
            })
            .collect()
    }
}

struct StubInquiry;

impl InquiryEngine for StubInquiry {
    fn start(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn cancel(&mut self) {}
    fn request_name(&mut self, _address: &BdAddr) {}
    fn next_unnamed_device(&self) -> Option<BdAddr> {
        None
    }
}

struct StubGatt;

impl GattBackend for StubGatt {
    fn register(&mut self) -> GattIf {
        GattIf(1)
    }
    fn open(&mut self, _client_if: GattIf, _address: &BdAddr) -> GattConnId {
        GattConnId(1)
    }
    fn read_service_entry(&mut self, _conn_id: GattConnId, _index: u8) {}
    fn close(&mut self, _conn_id: GattConnId) {}
}

struct StubTimers;

impl TimerService for StubTimers {
    fn schedule(&mut self, _after: Duration, _timer: Timer) -> TimerHandle {
        TimerHandle(0)
    }
    fn cancel(&mut self, _handle: TimerHandle) {}
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let headset = BdAddr::parse("AA:BB:CC:DD:EE:FF").unwrap();
    let laptop = BdAddr::parse("10:20:30:40:50:60").unwrap();

    let mut coordinator = DiscoveryCoordinator::new(
        Box::new(StubInquiry),
        Box::new(DemoSdp {
            peers: vec![
                (
                    headset,
                    vec![
                        bluescout::service_uuid(ServiceId::Hfp),
                        bluescout::service_uuid(ServiceId::A2dpSink),
                    ],
                ),
                (laptop, vec![bluescout::service_uuid(ServiceId::Opp)]),
            ],
            last_query: Arc::new(Mutex::new(None)),
        }),
        Box::new(StubGatt),
        Box::new(StubTimers),
    );

    let report = |label: &'static str| {
        DiscoveryCallbacks::from_fn(move |result| {
            println!(
                "{}: {} -> status {} services {:?}",
                label, result.address, result.status, result.services
            );
            for uuid in &result.uuids {
                println!("  service record {}", uuid);
            }
        })
    };

    println!("Discovering services on two peers back to back...");
    coordinator.discover_request(
        DiscoverRequest::new(headset, report("headset"), Transport::Classic).with_services(
            ServiceMask::HFP | ServiceMask::A2DP_SINK | ServiceMask::OPP,
        ),
    )?;
    // Second request queues behind the first and starts automatically.
    coordinator.discover_request(
        DiscoverRequest::new(laptop, report("laptop"), Transport::Classic)
            .with_services(ServiceMask::OPP | ServiceMask::FTP),
    )?;
    println!("Requests queued: {}", coordinator.pending_discoveries());

    // Answer SDP queries until both cycles have finalized.
    while coordinator.discovery_state() == DiscoveryState::Active {
        coordinator.dispatch(Message::Discovery(DiscoveryEvent::SdpReply {
            status: SdpStatus::Success,
        }))?;
    }

    Ok(())
}
