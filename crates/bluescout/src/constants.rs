//! Crate-wide constants for discovery coordination

use std::time::Duration;

/// Upper bound on a single service discovery cycle. A peer that has not
/// produced a terminal SDP or GATT reply by then is abandoned with a timeout
/// status.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a GATT connection is left open after a low-energy discovery
/// finishes, so that an immediate follow-up query against the same peer can
/// reuse it instead of paying a fresh link setup.
pub const DEFAULT_GATT_CLOSE_DELAY: Duration = Duration::from_millis(1000);

/// Capacity of the per-cycle SDP discovery buffer handed to the SDP client.
pub const SDP_BUFFER_CAPACITY: usize = 8192;
