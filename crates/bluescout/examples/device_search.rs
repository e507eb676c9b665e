use bluescout::{
    BdAddr, DiscoveryCoordinator, Error, GattBackend, GattConnId, GattIf, HciStatus,
    InquiryEngine, Message, SdpBackend, SdpBuffer, SearchEvent, SearchResult, ServiceMask, Timer,
    TimerHandle, TimerService, Uuid,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulated inquiry engine: a fixed neighbourhood of devices whose name
/// requests are parked for the main loop to answer.
struct DemoInquiry {
    unnamed: Arc<Mutex<VecDeque<BdAddr>>>,
    outstanding: Arc<Mutex<VecDeque<BdAddr>>>,
}

impl InquiryEngine for DemoInquiry {
    fn start(&mut self) -> Result<(), Error> {
        println!("[inquiry] started");
        Ok(())
    }

    fn cancel(&mut self) {
        println!("[inquiry] cancelled");
    }

    fn request_name(&mut self, address: &BdAddr) {
        println!("[inquiry] name request for {}", address);
        self.outstanding.lock().unwrap().push_back(*address);
        self.unnamed.lock().unwrap().retain(|a| a != address);
    }

    fn next_unnamed_device(&self) -> Option<BdAddr> {
        self.unnamed.lock().unwrap().front().copied()
    }
}

struct StubSdp;

impl SdpBackend for StubSdp {
    fn connect_and_search(
        &mut self,
        _address: &BdAddr,
        _services: ServiceMask,
        _db: &mut SdpBuffer,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn discovered_uuids(&self) -> Vec<Uuid> {
        Vec::new()
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

fn name_of(address: &BdAddr) -> String {
    match address.to_string().as_str() {
        "AA:BB:CC:DD:EE:01" => "Kitchen Speaker".into(),
        "AA:BB:CC:DD:EE:02" => "Car Kit".into(),
        _ => "Unknown".into(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let neighbourhood = vec![
        BdAddr::parse("AA:BB:CC:DD:EE:01").unwrap(),
        BdAddr::parse("AA:BB:CC:DD:EE:02").unwrap(),
    ];

    let unnamed = Arc::new(Mutex::new(neighbourhood.iter().copied().collect()));
    let outstanding = Arc::new(Mutex::new(VecDeque::new()));

    let mut coordinator = DiscoveryCoordinator::new(
        Box::new(DemoInquiry {
            unnamed,
            outstanding: outstanding.clone(),
        }),
        Box::new(StubSdp),
        Box::new(StubGatt),
        Box::new(StubTimers),
    );

    println!("Starting device search...");
    coordinator.start_device_search(Box::new(|result| match result {
        SearchResult::Device { address, name, .. } => {
            println!("Discovered device: {} ({})", address, name);
        }
        SearchResult::Complete => println!("Search complete"),
    }))?;

    // The radio reports the inquiry phase as finished...
    coordinator.dispatch(Message::Search(SearchEvent::InquiryComplete {
        num_responses: neighbourhood.len() as u8,
    }))?;

    // ...and each parked name request gets its reply, one at a time.
    loop {
        let next = outstanding.lock().unwrap().pop_front();
        let Some(address) = next else { break };
        coordinator.dispatch(Message::Search(SearchEvent::RemoteName {
            address,
            name: name_of(&address),
            hci_status: HciStatus::SUCCESS,
        }))?;
    }

    Ok(())
}
