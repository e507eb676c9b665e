//! Service identifiers, lookup tables and found-service aggregation
//!
//! Every profile the coordinator can search for has a fixed internal
//! identifier. Two parallel tables, indexed by that identifier, carry the
//! id the security/service manager knows the profile by and the SIG-assigned
//! 16-bit UUID advertised in the peer's service records.

use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

/// Internal identifier for a searchable service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceId {
    Spp = 0,
    Dun,
    A2dpSource,
    Hsp,
    Hfp,
    Opp,
    Ftp,
    Panu,
    Nap,
    Sap,
    A2dpSink,
    Avrcp,
    Hid,
    Pbap,
    Map,
    Gatt,
}

impl ServiceId {
    pub const COUNT: usize = 16;

    /// All service identifiers, in table order.
    pub const ALL: [ServiceId; ServiceId::COUNT] = [
        ServiceId::Spp,
        ServiceId::Dun,
        ServiceId::A2dpSource,
        ServiceId::Hsp,
        ServiceId::Hfp,
        ServiceId::Opp,
        ServiceId::Ftp,
        ServiceId::Panu,
        ServiceId::Nap,
        ServiceId::Sap,
        ServiceId::A2dpSink,
        ServiceId::Avrcp,
        ServiceId::Hid,
        ServiceId::Pbap,
        ServiceId::Map,
        ServiceId::Gatt,
    ];

    /// The mask bit corresponding to this service.
    pub fn mask(self) -> ServiceMask {
        ServiceMask::from_bits_truncate(1 << self as u32)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceId::Spp => "SPP",
            ServiceId::Dun => "DUN",
            ServiceId::A2dpSource => "A2DP-SRC",
            ServiceId::Hsp => "HSP",
            ServiceId::Hfp => "HFP",
            ServiceId::Opp => "OPP",
            ServiceId::Ftp => "FTP",
            ServiceId::Panu => "PANU",
            ServiceId::Nap => "NAP",
            ServiceId::Sap => "SAP",
            ServiceId::A2dpSink => "A2DP-SNK",
            ServiceId::Avrcp => "AVRCP",
            ServiceId::Hid => "HID",
            ServiceId::Pbap => "PBAP",
            ServiceId::Map => "MAP",
            ServiceId::Gatt => "GATT",
        };
        write!(f, "{}", name)
    }
}

bitflags! {
    /// Bitmask over the fixed set of searchable services.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServiceMask: u32 {
        const SPP = 1 << ServiceId::Spp as u32;
        const DUN = 1 << ServiceId::Dun as u32;
        const A2DP_SOURCE = 1 << ServiceId::A2dpSource as u32;
        const HSP = 1 << ServiceId::Hsp as u32;
        const HFP = 1 << ServiceId::Hfp as u32;
        const OPP = 1 << ServiceId::Opp as u32;
        const FTP = 1 << ServiceId::Ftp as u32;
        const PANU = 1 << ServiceId::Panu as u32;
        const NAP = 1 << ServiceId::Nap as u32;
        const SAP = 1 << ServiceId::Sap as u32;
        const A2DP_SINK = 1 << ServiceId::A2dpSink as u32;
        const AVRCP = 1 << ServiceId::Avrcp as u32;
        const HID = 1 << ServiceId::Hid as u32;
        const PBAP = 1 << ServiceId::Pbap as u32;
        const MAP = 1 << ServiceId::Map as u32;
        const GATT = 1 << ServiceId::Gatt as u32;
    }
}

/// Service id -> SIG-assigned 16-bit service class UUID.
const SERVICE_ID_TO_UUID: [u16; ServiceId::COUNT] = [
    0x1101, // Serial Port
    0x1103, // Dialup Networking
    0x110A, // Audio Source
    0x1108, // Headset
    0x111E, // Handsfree
    0x1105, // OBEX Object Push
    0x1106, // OBEX File Transfer
    0x1115, // PAN User
    0x1116, // Network Access Point
    0x112D, // SIM Access
    0x110B, // Audio Sink
    0x110E, // A/V Remote Control
    0x1124, // Human Interface Device
    0x112F, // Phonebook Access Server
    0x1132, // Message Access Server
    0x1801, // Generic Attribute
];

/// Service id -> id the security/service manager registers the profile under.
const SERVICE_ID_TO_MANAGER_ID: [u32; ServiceId::COUNT] = [
    1,  // serial port
    3,  // dialup networking
    16, // generic audio, source role
    8,  // headset
    21, // handsfree
    6,  // generic object exchange
    7,  // file transfer
    14, // PAN user
    15, // network access point
    19, // SIM access
    18, // audio sink
    17, // remote control
    20, // HID interconnect
    22, // phonebook server
    23, // message access
    24, // generic attribute
];

/// Legacy record class accepted in addition to the assigned UUID. Older
/// headsets expose the Headset-HS record class instead of Headset.
const HSP_HS_LEGACY_UUID: u16 = 0x1131;

/// The service class UUID a peer advertises for `id`.
pub fn service_uuid(id: ServiceId) -> Uuid {
    Uuid::from_u16(SERVICE_ID_TO_UUID[id as usize])
}

/// The service-manager id registered for `id`.
pub fn service_manager_id(id: ServiceId) -> u32 {
    SERVICE_ID_TO_MANAGER_ID[id as usize]
}

/// Reverse lookup from an advertised UUID, accepting legacy record forms.
pub fn service_from_uuid(uuid: &Uuid) -> Option<ServiceId> {
    let short = uuid.as_u16()?;
    if short == HSP_HS_LEGACY_UUID {
        return Some(ServiceId::Hsp);
    }
    ServiceId::ALL
        .iter()
        .find(|id| SERVICE_ID_TO_UUID[**id as usize] == short)
        .copied()
}

/// Computes which of the requested services are present in a discovered UUID
/// set. Pure and order-independent: the result depends only on the set
/// membership of the discovered UUIDs, never on the order queries ran in.
///
/// The result is always a subset of `requested`.
pub fn found_services(requested: ServiceMask, discovered: &[Uuid]) -> ServiceMask {
    let mut found = ServiceMask::empty();
    for id in ServiceId::ALL {
        if !requested.contains(id.mask()) {
            continue;
        }
        let assigned = service_uuid(id);
        let hit = discovered.iter().any(|uuid| {
            *uuid == assigned
                || (id == ServiceId::Hsp && uuid.as_u16() == Some(HSP_HS_LEGACY_UUID))
        });
        if hit {
            found |= id.mask();
        }
    }
    found
}
