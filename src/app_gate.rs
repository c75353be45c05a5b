use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;

use crate::error::{NodeError, NodeResult};
use crate::layers::ApplicationLayer;
use crate::topology::NodeAddr;

/// Which outstanding frames hold the application producer back
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateMode {
    /// A single outstanding frame for the whole node: any submission disables the application
    ///  until its ack arrives. All peers are served one after the other.
    Global,
    /// One outstanding frame per peer. The application stays enabled, and submissions for a
    ///  peer that is still awaiting an ack are rejected.
    PerConnection,
}

/// Flow control between the application producer and the ARQ state machines. There is no
///  queueing: a submission while the gate is closed is rejected, and the producer is expected to
///  hold back until it is told that the gate is open again.
pub struct ApplicationGate {
    mode: GateMode,
    enabled: bool,
    busy: BTreeSet<NodeAddr>,
    application: Arc<dyn ApplicationLayer>,
}

impl ApplicationGate {
    /// The gate starts out closed, see [ApplicationGate::open]
    pub fn new(mode: GateMode, application: Arc<dyn ApplicationLayer>) -> ApplicationGate {
        ApplicationGate {
            mode,
            enabled: false,
            busy: BTreeSet::new(),
            application,
        }
    }

    /// enables the application producer, done once at node start
    pub fn open(&mut self) {
        self.set_enabled(true);
    }

    pub fn is_open_for(&self, peer: NodeAddr) -> bool {
        self.enabled && !self.busy.contains(&peer)
    }

    /// Admits a submission for `peer`, closing the gate (globally or for that peer) until
    ///  [ApplicationGate::release] is called for the same peer
    pub fn try_acquire(&mut self, peer: NodeAddr) -> NodeResult<()> {
        if !self.is_open_for(peer) {
            return Err(NodeError::GateClosed(peer));
        }

        self.busy.insert(peer);
        if self.mode == GateMode::Global {
            self.set_enabled(false);
        }
        Ok(())
    }

    /// reopens the gate after the outstanding frame to `peer` was acknowledged, or after its
    ///  submission failed
    pub fn release(&mut self, peer: NodeAddr) {
        if !self.busy.remove(&peer) {
            trace!(?peer, "releasing gate for a peer that was not holding it");
            return;
        }
        if self.mode == GateMode::Global {
            self.set_enabled(true);
        }
        self.application.peer_released(peer);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.application.set_acceptance(enabled);
    }
}
