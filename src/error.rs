use thiserror::Error;

use crate::frame::{FrameError, SeqNo};
use crate::layers::TimerId;
use crate::topology::{LinkId, NodeAddr};

#[derive(Debug, Error)]
pub enum NodeError {
    /// corrupted or malformed frame - it is discarded, the sender's timer takes care of recovery
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// fatal for the send attempt that caused it, and surfaced to the caller
    #[error("connection table is full ({capacity} connections) - cannot add {peer:?}")]
    CapacityExceeded { capacity: usize, peer: NodeAddr },

    #[error("no connection for {0:?}")]
    NotFound(NodeAddr),

    #[error("unexpected ack {received} from {peer:?}, expected {expected}")]
    UnexpectedAck { peer: NodeAddr, expected: SeqNo, received: SeqNo },

    #[error("unexpected sequence number {received} from {peer:?}, expected {expected}")]
    UnexpectedSequence { peer: NodeAddr, expected: SeqNo, received: SeqNo },

    #[error("link {link} is unavailable: {reason}")]
    LinkUnavailable { link: LinkId, reason: String },

    #[error("application gate is closed for {0:?} - a frame is still awaiting its ack")]
    GateClosed(NodeAddr),

    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("this node is a router and has no application layer")]
    NotAHost,

    #[error("messages to the local address {0:?} are not sent over the network")]
    SelfAddressed(NodeAddr),

    #[error("delivery to the application failed: {0}")]
    Delivery(String),

    /// arming a second live timer for a connection would leak a stale timer
    #[error("connection to {peer:?} already has live timer {timer}")]
    TimerAlreadyArmed { peer: NodeAddr, timer: TimerId },
}

pub type NodeResult<T> = Result<T, NodeError>;
