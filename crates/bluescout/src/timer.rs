//! Cancellable scheduled-task abstraction
//!
//! The coordinator never blocks; anything time-driven is a scheduled task
//! whose expiry the embedder feeds back through the same dispatch path as
//! every other event, keeping processing strictly one event at a time.

use std::time::Duration;

/// Which coordinator timer a scheduled task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Overall guard on a service discovery cycle; expiry re-enters the
    /// coordinator as `DiscoveryEvent::DiscoveryTimeout`.
    Discovery,
    /// Delayed close of a GATT connection left open after a low-energy
    /// cycle; expiry re-enters as `DiscoveryEvent::GattCloseTimeout`.
    GattClose,
}

/// Handle for a scheduled task, used to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(pub u64);

/// Scheduling collaborator implemented by the embedder.
pub trait TimerService {
    /// Arranges for `timer` to fire after `after`. A fired task must be
    /// translated into the matching timeout event and dispatched; a
    /// cancelled task must never fire.
    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerHandle;

    fn cancel(&mut self, handle: TimerHandle);
}
