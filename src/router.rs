use std::marker::PhantomData;

use crate::topology::{LinkId, NodeIdentity};
use crate::util::random::{Random, RngRandom};

/// Link selection without any notion of paths: frames for other nodes are flooded out of every
///  link except the one they arrived on, and locally originated frames use either the link that
///  proved to work for the destination (see [crate::connection::Connection::learn_link]) or a
///  randomly chosen one.
pub struct Router<R: Random = RngRandom> {
    identity: NodeIdentity,
    pd: PhantomData<R>,
}

impl<R: Random> Router<R> {
    pub fn new(identity: NodeIdentity) -> Router<R> {
        Router {
            identity,
            pd: PhantomData,
        }
    }

    /// The links to forward a frame on that arrived on `ingress` and is not addressed to this
    ///  node. With two links this is the other link; a leaf node (single link) does not forward.
    pub fn forwarding_links(&self, ingress: LinkId) -> Vec<LinkId> {
        if self.identity.num_links <= 1 {
            return Vec::new();
        }
        self.identity.links()
            .filter(|&l| l != ingress)
            .collect()
    }

    /// The link for a frame originated by this node, given the link cached for the destination
    pub fn origination_link(&self, cached: Option<LinkId>) -> LinkId {
        if let Some(link) = cached {
            return link;
        }
        if self.identity.num_links == 1 {
            return LinkId::FIRST;
        }
        LinkId(R::below(self.identity.num_links as usize) as u8 + 1)
    }
}
