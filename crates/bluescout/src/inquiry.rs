//! Inquiry engine interface
//!
//! The engine owns the inquiry procedure and the store of devices it has
//! heard from. Its asynchronous replies re-enter the coordinator as
//! `SearchEvent::InquiryComplete` and `SearchEvent::RemoteName`.

use crate::error::Error;
use crate::types::BdAddr;

pub trait InquiryEngine {
    /// Begins an inquiry. Completion, however it ends, is reported via an
    /// `InquiryComplete` event.
    fn start(&mut self) -> Result<(), Error>;

    /// Requests cancellation of a running inquiry. Best effort: the engine
    /// still emits a final `InquiryComplete` once the cancellation settles.
    fn cancel(&mut self);

    /// Issues a remote name request; the reply arrives as a `RemoteName`
    /// event carrying the same address.
    fn request_name(&mut self, address: &BdAddr);

    /// The next inquiry result whose name is still unknown, if any. A device
    /// stops being reported here once a name reply for it has been observed.
    fn next_unnamed_device(&self) -> Option<BdAddr>;
}
