pub mod arq;
pub mod connection_table;

use std::fmt::{Display, Formatter};

use crate::connection::arq::Arq;
use crate::frame::SeqNo;
use crate::topology::{LinkId, NodeAddr};

/// Per-peer protocol context. A connection is created lazily on the first message to or from a
///  peer, and it lives as long as the node.
#[derive(Debug)]
pub struct Connection {
    peer: NodeAddr,
    pub arq: Arq,
    /// the link on which an ack from this peer was first received
    link: Option<LinkId>,
}

impl Connection {
    pub fn new(peer: NodeAddr) -> Connection {
        Connection {
            peer,
            arq: Arq::default(),
            link: None,
        }
    }

    pub fn peer(&self) -> NodeAddr {
        self.peer
    }

    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// Caches the link an ack arrived on. Once a link is known it is kept, returning `true` only
    ///  if the link was actually learned by this call.
    pub fn learn_link(&mut self, link: LinkId) -> bool {
        if self.link.is_some() {
            return false;
        }
        self.link = Some(link);
        true
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            peer: self.peer,
            ack_expected: self.arq.ack_expected(),
            next_frame_to_send: self.arq.next_frame_to_send(),
            frame_expected: self.arq.frame_expected(),
            link: self.link,
        }
    }
}

/// A point-in-time copy of a connection's counters for diagnostics
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionSnapshot {
    pub peer: NodeAddr,
    pub ack_expected: SeqNo,
    pub next_frame_to_send: SeqNo,
    pub frame_expected: SeqNo,
    pub link: Option<LinkId>,
}

impl Display for ConnectionSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "addr={} ack_expected={} next_frame_to_send={} frame_expected={} link=",
               self.peer, self.ack_expected, self.next_frame_to_send, self.frame_expected)?;
        match self.link {
            Some(link) => write!(f, "{}", link),
            None => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_is_learned_once() {
        let mut conn = Connection::new(NodeAddr(5));
        assert_eq!(conn.link(), None);

        assert!(conn.learn_link(LinkId(2)));
        assert!(!conn.learn_link(LinkId(1)));
        assert_eq!(conn.link(), Some(LinkId(2)));
    }

    #[test]
    fn test_snapshot_display() {
        let conn = Connection::new(NodeAddr(5));
        assert_eq!(
            conn.snapshot().to_string(),
            "addr=5 ack_expected=0 next_frame_to_send=0 frame_expected=0 link=unknown"
        );
    }
}
