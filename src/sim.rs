//! An in-memory network for running nodes against each other. Links have the bandwidth and
//!  propagation delay they report to their nodes, and they lose or corrupt frames at random with
//!  configurable rates.
//!
//! Everything runs on tokio, so a simulation under paused time (see `tokio::time::pause`) runs as
//!  fast as the CPU allows while still observing all link delays and retransmission timeouts.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use anyhow::{anyhow, bail};
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::driver::{run_node, NodeEvent, TokioTimerService};
use crate::layers::{ApplicationLayer, PhysicalLayer};
use crate::node::Node;
use crate::node_config::NodeConfig;
use crate::timing::transmission_time;
use crate::topology::{LinkId, LinkInfo, NodeAddr, NodeIdentity};
use crate::util::random::{Random, RngRandom};

#[derive(Clone, Copy, Debug)]
pub struct LinkSpec {
    pub info: LinkInfo,
    /// probability that a frame is lost, in `[0.0, 1.0]`
    pub loss_rate: f64,
    /// probability that a single bit of a frame is flipped, in `[0.0, 1.0]`
    pub corruption_rate: f64,
}

impl LinkSpec {
    pub fn reliable(info: LinkInfo) -> LinkSpec {
        LinkSpec {
            info,
            loss_rate: 0.0,
            corruption_rate: 0.0,
        }
    }
}

struct Wire {
    spec: LinkSpec,
    peer: NodeAddr,
    peer_link: LinkId,
    peer_events: mpsc::UnboundedSender<NodeEvent>,
}

/// The sending end of a node's links. Frames that survive the fault model arrive at the peer as
///  [NodeEvent::FrameArrived] after the link's transmission time.
pub struct SimPhysicalLayer<R: Random = RngRandom> {
    addr: NodeAddr,
    /// link `n` is at index `n-1`
    wires: Vec<Wire>,
    pd: PhantomData<fn() -> R>,
}

impl<R: Random + 'static> PhysicalLayer for SimPhysicalLayer<R> {
    fn write_frame(&self, link: LinkId, frame_buf: &[u8]) -> anyhow::Result<()> {
        let wire = (link.0 as usize).checked_sub(1)
            .and_then(|idx| self.wires.get(idx))
            .ok_or_else(|| anyhow!("node {} has no link {}", self.addr, link))?;

        if R::chance(wire.spec.loss_rate) {
            trace!(addr = ?self.addr, %link, "frame lost");
            return Ok(());
        }

        let mut buf = BytesMut::from(frame_buf);
        if !buf.is_empty() && R::chance(wire.spec.corruption_rate) {
            let bit = R::below(buf.len() * 8);
            buf[bit / 8] ^= 1 << (bit % 8);
            trace!(addr = ?self.addr, %link, bit, "frame corrupted");
        }

        let delay = transmission_time(frame_buf.len(), &wire.spec.info);
        let event = NodeEvent::FrameArrived { link: wire.peer_link, frame_buf: buf.freeze() };
        let peer = wire.peer;
        let peer_events = wire.peer_events.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if peer_events.send(event).is_err() {
                trace!(?peer, "frame arrived at a node that was shut down");
            }
        });
        Ok(())
    }

    fn link_info(&self, link: LinkId) -> Option<LinkInfo> {
        (link.0 as usize).checked_sub(1)
            .and_then(|idx| self.wires.get(idx))
            .map(|w| w.spec.info)
    }
}

/// What the application producer sees of its node's gate
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GateSignal {
    pub open: bool,
    /// per peer, how often the node released it for the next submission
    pub releases: BTreeMap<NodeAddr, u64>,
}

impl GateSignal {
    pub fn releases_for(&self, peer: NodeAddr) -> u64 {
        self.releases.get(&peer).copied().unwrap_or(0)
    }
}

/// An application layer that passes delivered messages and gate changes on through channels
pub struct SimApplication {
    gate: watch::Sender<GateSignal>,
    deliveries: mpsc::UnboundedSender<(NodeAddr, Bytes)>,
}

impl ApplicationLayer for SimApplication {
    fn deliver(&self, from: NodeAddr, payload: &[u8]) -> anyhow::Result<()> {
        self.deliveries.send((from, Bytes::copy_from_slice(payload)))
            .map_err(|_| anyhow!("application stopped consuming messages"))
    }

    fn set_acceptance(&self, enabled: bool) {
        self.gate.send_modify(|signal| signal.open = enabled);
    }

    fn peer_released(&self, peer: NodeAddr) {
        self.gate.send_modify(|signal| *signal.releases.entry(peer).or_default() += 1);
    }
}

/// Submits messages to `dest` one at a time, each once the node has released `dest` after the
///  previous one. This works with either [crate::app_gate::GateMode], assuming a single producer
///  per node for `Global` and a single producer per destination for `PerConnection`.
pub async fn produce(
    events: &mpsc::UnboundedSender<NodeEvent>,
    gate: &mut watch::Receiver<GateSignal>,
    dest: NodeAddr,
    messages: impl IntoIterator<Item = Bytes>,
) -> anyhow::Result<()> {
    for payload in messages {
        let released = gate.wait_for(|s| s.open).await?.releases_for(dest);
        events.send(NodeEvent::ApplicationMessage { dest, payload })
            .map_err(|_| anyhow!("node was shut down"))?;
        gate.wait_for(|s| s.releases_for(dest) > released).await?;
    }
    Ok(())
}

struct PlannedNode {
    addr: NodeAddr,
    config: NodeConfig,
    /// (spec, peer, peer's link)
    links: Vec<(LinkSpec, NodeAddr, LinkId)>,
    events: mpsc::UnboundedSender<NodeEvent>,
    event_receiver: mpsc::UnboundedReceiver<NodeEvent>,
}

/// Describes a network of nodes and the links between them, see [SimNetwork::start]
#[derive(Default)]
pub struct SimNetwork {
    nodes: Vec<PlannedNode>,
}

impl SimNetwork {
    pub fn new() -> SimNetwork {
        Default::default()
    }

    pub fn add_node(&mut self, addr: NodeAddr, config: NodeConfig) -> anyhow::Result<()> {
        if self.nodes.iter().any(|n| n.addr == addr) {
            bail!("duplicate node address {}", addr);
        }
        let (events, event_receiver) = mpsc::unbounded_channel();
        self.nodes.push(PlannedNode {
            addr,
            config,
            links: Vec::new(),
            events,
            event_receiver,
        });
        Ok(())
    }

    /// Adds a bidirectional link between two nodes, with the same characteristics in both
    ///  directions. Each node numbers its links in the order they are added, starting at 1.
    pub fn connect(&mut self, a: NodeAddr, b: NodeAddr, spec: LinkSpec) -> anyhow::Result<()> {
        if a == b {
            bail!("cannot connect node {} to itself", a);
        }
        let idx_a = self.index_of(a)?;
        let idx_b = self.index_of(b)?;

        let link_a = Self::next_link(&self.nodes[idx_a])?;
        let link_b = Self::next_link(&self.nodes[idx_b])?;
        self.nodes[idx_a].links.push((spec, b, link_b));
        self.nodes[idx_b].links.push((spec, a, link_a));

        debug!("link {}/{} <-> {}/{}", a, link_a, b, link_b);
        Ok(())
    }

    fn index_of(&self, addr: NodeAddr) -> anyhow::Result<usize> {
        self.nodes.iter()
            .position(|n| n.addr == addr)
            .ok_or_else(|| anyhow!("unknown node {}", addr))
    }

    fn next_link(node: &PlannedNode) -> anyhow::Result<LinkId> {
        u8::try_from(node.links.len() + 1)
            .map(LinkId)
            .map_err(|_| anyhow!("node {} has too many links", node.addr))
    }

    /// Starts every node's event loop. This must be called from within a tokio runtime.
    pub fn start(self) -> anyhow::Result<RunningSim> {
        let senders = self.nodes.iter()
            .map(|n| (n.addr, n.events.clone()))
            .collect::<Vec<_>>();
        let sender_for = |addr: NodeAddr| senders.iter()
            .find(|(a, _)| *a == addr)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| anyhow!("unknown node {}", addr));

        let mut running = RunningSim::default();
        for planned in self.nodes {
            let mut wires = Vec::with_capacity(planned.links.len());
            for (spec, peer, peer_link) in &planned.links {
                wires.push(Wire {
                    spec: *spec,
                    peer: *peer,
                    peer_link: *peer_link,
                    peer_events: sender_for(*peer)?,
                });
            }
            let num_links = u8::try_from(wires.len())?;
            let identity = NodeIdentity::new(planned.addr, num_links)?;

            let (gate_sender, gate) = watch::channel(GateSignal::default());
            let (delivery_sender, deliveries) = mpsc::unbounded_channel();

            let node = Node::new(
                planned.config,
                identity,
                std::sync::Arc::new(SimPhysicalLayer::<RngRandom> { addr: planned.addr, wires, pd: PhantomData }),
                std::sync::Arc::new(SimApplication { gate: gate_sender, deliveries: delivery_sender }),
                std::sync::Arc::new(TokioTimerService::new(&planned.events)),
            )?;

            running.tasks.push(tokio::spawn(run_node(node, planned.event_receiver)));
            running.shutdown_senders.push(planned.events.clone());
            running.handles.push(SimNodeHandle {
                addr: planned.addr,
                events: planned.events,
                gate,
                deliveries,
            });
        }
        Ok(running)
    }
}

/// A started simulation. Node handles can be taken out to drive nodes from separate tasks.
#[derive(Default)]
pub struct RunningSim {
    handles: Vec<SimNodeHandle>,
    shutdown_senders: Vec<mpsc::UnboundedSender<NodeEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningSim {
    pub fn take_handle(&mut self, addr: NodeAddr) -> Option<SimNodeHandle> {
        let idx = self.handles.iter().position(|h| h.addr == addr)?;
        Some(self.handles.swap_remove(idx))
    }

    /// asks all nodes to log their connection state
    pub fn dump_state(&self) {
        for events in &self.shutdown_senders {
            let _ = events.send(NodeEvent::DumpState);
        }
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        for events in &self.shutdown_senders {
            // a node that is gone already needs no shutdown
            let _ = events.send(NodeEvent::Shutdown);
        }
        for task in self.tasks {
            task.await?;
        }
        Ok(())
    }
}

pub struct SimNodeHandle {
    pub addr: NodeAddr,
    pub events: mpsc::UnboundedSender<NodeEvent>,
    pub gate: watch::Receiver<GateSignal>,
    pub deliveries: mpsc::UnboundedReceiver<(NodeAddr, Bytes)>,
}

impl SimNodeHandle {
    /// see [produce]
    pub async fn send_all(&mut self, dest: NodeAddr, messages: impl IntoIterator<Item = Bytes>) -> anyhow::Result<()> {
        produce(&self.events, &mut self.gate, dest, messages).await
    }

    /// waits for the next `n` messages delivered to this node's application
    pub async fn receive(&mut self, n: usize) -> anyhow::Result<Vec<(NodeAddr, Bytes)>> {
        let mut result = Vec::with_capacity(n);
        while result.len() < n {
            let delivered = self.deliveries.recv().await
                .ok_or_else(|| anyhow!("node {} was shut down", self.addr))?;
            result.push(delivered);
        }
        Ok(result)
    }
}
