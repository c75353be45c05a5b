use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

use anyhow::bail;

/// A node's stable numeric address, assigned by the addressing service and fixed for the node's
///  lifetime.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeAddr(pub u32);

impl Debug for NodeAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[node {}]", self.0)
    }
}

impl Display for NodeAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outgoing links are numbered starting at 1, matching the transport's numbering.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LinkId(pub u8);

impl Display for LinkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl LinkId {
    pub const FIRST: LinkId = LinkId(1);

    /// all link ids of a node with `num_links` links, in ascending order
    pub fn all(num_links: u8) -> impl Iterator<Item = LinkId> {
        (1..=num_links).map(LinkId)
    }
}

/// Per-link characteristics as reported by the physical transport
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkInfo {
    pub bandwidth_bits_per_sec: u64,
    pub propagation_delay: Duration,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// has an application layer that originates and consumes messages
    Host,
    /// relays frames between its links, no application layer
    Router,
}

/// The read-only facts the topology service provides about the local node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeIdentity {
    pub addr: NodeAddr,
    pub num_links: u8,
}

impl NodeIdentity {
    pub fn new(addr: NodeAddr, num_links: u8) -> anyhow::Result<NodeIdentity> {
        if num_links == 0 {
            bail!("node {} has no links - at least one link is required", addr);
        }
        Ok(NodeIdentity { addr, num_links })
    }

    pub fn has_link(&self, link: LinkId) -> bool {
        link.0 >= 1 && link.0 <= self.num_links
    }

    pub fn links(&self) -> impl Iterator<Item = LinkId> {
        LinkId::all(self.num_links)
    }
}
