//! The collaborators a [crate::node::Node] relies on but does not implement: the physical
//!  transport, the application layer and a timer service. They are traits to decouple the
//!  protocol logic from the actual I/O, and to allow mocking it away for testing.
//!
//! All calls are expected to return promptly: frames, messages and timer expiries travel back
//!  to the node as separate events rather than as return values.

use std::fmt::{Display, Formatter};
use std::time::Duration;

#[cfg(test)] use mockall::automock;

use crate::topology::{LinkId, LinkInfo, NodeAddr};

#[cfg_attr(test, automock)]
pub trait PhysicalLayer: Send + Sync + 'static {
    /// Hands a serialized frame to the link for transmission. The frame may still be lost or
    ///  corrupted on the way, an error only means the link could not accept it.
    fn write_frame(&self, link: LinkId, frame_buf: &[u8]) -> anyhow::Result<()>;

    fn link_info(&self, link: LinkId) -> Option<LinkInfo>;
}

#[cfg_attr(test, automock)]
pub trait ApplicationLayer: Send + Sync + 'static {
    fn deliver(&self, from: NodeAddr, payload: &[u8]) -> anyhow::Result<()>;

    /// Enables or disables the application's production of outbound messages
    fn set_acceptance(&self, enabled: bool);

    /// The frame submitted for `peer` was acknowledged, or its submission failed. Either way the
    ///  application may submit the next message for `peer` (subject to [Self::set_acceptance]).
    fn peer_released(&self, peer: NodeAddr);
}

/// Opaque handle for an armed timer
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TimerId(pub u64);

impl Display for TimerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg_attr(test, automock)]
pub trait TimerService: Send + Sync + 'static {
    /// Arms a one-shot timer. Its expiry is reported back to the node with the returned id.
    fn arm(&self, after: Duration) -> TimerId;

    /// Cancels a timer. Cancelling a timer that already fired is a no-op.
    fn cancel(&self, timer: TimerId);
}
