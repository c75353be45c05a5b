use std::sync::Arc;

use anyhow::{anyhow, bail};
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::app_gate::ApplicationGate;
use crate::connection::arq::{AckOutcome, DataOutcome};
use crate::connection::connection_table::ConnectionTable;
use crate::connection::ConnectionSnapshot;
use crate::error::{NodeError, NodeResult};
use crate::frame::{Frame, FrameKind, SeqNo};
use crate::layers::{ApplicationLayer, PhysicalLayer, TimerId, TimerService};
use crate::node_config::NodeConfig;
use crate::router::Router;
use crate::timing::estimate_timeout;
use crate::topology::{LinkId, LinkInfo, NodeAddr, NodeIdentity, NodeKind};
use crate::util::random::{Random, RngRandom};

/// What became of a frame that arrived on a link and was not rejected
#[derive(Debug, Eq, PartialEq)]
pub enum Arrival {
    /// the next data frame in sequence, its payload was handed to the application and acked
    Delivered { from: NodeAddr, seq: SeqNo },
    /// the ack for the frame that was awaiting it, which frees the connection for the next frame
    AckAccepted { from: NodeAddr, ack: SeqNo },
    /// addressed to some other node and passed on unchanged
    Forwarded { links: Vec<LinkId> },
    /// addressed to some other node, but there is no link to pass it on to
    Dropped,
}

/// The protocol core of a single node. It is driven by three kinds of events: frames arriving
///  from a link, messages submitted by the application, and timer expiries. Each handler runs to
///  completion and acts on the collaborators in [crate::layers] without blocking.
///
/// Handlers return errors for frames and submissions they reject. None of these errors leave the
///  node in an inconsistent state, so it is up to the caller to decide which of them are worth
///  more than a log message.
pub struct Node<R: Random = RngRandom> {
    config: NodeConfig,
    identity: NodeIdentity,
    /// link `n` is at index `n-1`
    link_infos: Vec<LinkInfo>,
    connections: ConnectionTable,
    router: Router<R>,
    gate: ApplicationGate,
    physical: Arc<dyn PhysicalLayer>,
    application: Arc<dyn ApplicationLayer>,
    timers: Arc<dyn TimerService>,
}

impl Node<RngRandom> {
    pub fn new(
        config: NodeConfig,
        identity: NodeIdentity,
        physical: Arc<dyn PhysicalLayer>,
        application: Arc<dyn ApplicationLayer>,
        timers: Arc<dyn TimerService>,
    ) -> anyhow::Result<Node> {
        Self::new_with_random(config, identity, physical, application, timers)
    }
}

impl<R: Random> Node<R> {
    /// Sets up the node, reading the characteristics of all its links up front since they are
    ///  fixed for the node's lifetime. A host's application gate is opened right away.
    pub fn new_with_random(
        config: NodeConfig,
        identity: NodeIdentity,
        physical: Arc<dyn PhysicalLayer>,
        application: Arc<dyn ApplicationLayer>,
        timers: Arc<dyn TimerService>,
    ) -> anyhow::Result<Node<R>> {
        config.validate()?;

        let mut link_infos = Vec::with_capacity(identity.num_links as usize);
        for link in identity.links() {
            let info = physical.link_info(link)
                .ok_or_else(|| anyhow!("node {}: no information for link {}", identity.addr, link))?;
            if info.bandwidth_bits_per_sec == 0 {
                bail!("node {}: link {} has no bandwidth", identity.addr, link);
            }
            link_infos.push(info);
        }

        let mut gate = ApplicationGate::new(config.gate_mode, application.clone());
        if config.node_kind == NodeKind::Host {
            gate.open();
        }

        info!(addr = ?identity.addr, kind = ?config.node_kind, num_links = identity.num_links, "starting node");

        Ok(Node {
            connections: ConnectionTable::new(config.max_connections),
            router: Router::new(identity),
            config,
            identity,
            link_infos,
            gate,
            physical,
            application,
            timers,
        })
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    /// whether a message for `dest` would currently pass the application gate
    pub fn accepts_message_for(&self, dest: NodeAddr) -> bool {
        self.gate.is_open_for(dest)
    }

    /// Sends a message from the application to `dest`, returning the sequence number it was
    ///  sent with. The message stays buffered for retransmission until it is acknowledged.
    ///
    /// If the frame was buffered but the link rejected it, this returns
    ///  [NodeError::LinkUnavailable]: the retransmission timer is armed nonetheless, and the
    ///  message is retried when it expires.
    pub fn on_application_message(&mut self, dest: NodeAddr, payload: Bytes) -> NodeResult<SeqNo> {
        if self.config.node_kind != NodeKind::Host {
            return Err(NodeError::NotAHost);
        }
        if dest == self.identity.addr {
            return Err(NodeError::SelfAddressed(dest));
        }
        if payload.len() > self.config.max_payload_len {
            return Err(NodeError::PayloadTooLarge { len: payload.len(), max: self.config.max_payload_len });
        }

        self.gate.try_acquire(dest)?;

        let seq = match self.begin_send(dest, payload.clone()) {
            Ok(seq) => seq,
            Err(e) => {
                self.gate.release(dest);
                return Err(e);
            }
        };

        self.transmit_data(dest, seq, payload)?;
        Ok(seq)
    }

    fn begin_send(&mut self, dest: NodeAddr, payload: Bytes) -> NodeResult<SeqNo> {
        self.connections.lookup_or_create(dest)?
            .arq.begin_send(payload)
            .ok_or(NodeError::GateClosed(dest))
    }

    /// (Re-)transmits the data frame awaiting its ack, arming a fresh retransmission timer
    fn transmit_data(&mut self, dest: NodeAddr, seq: SeqNo, payload: Bytes) -> NodeResult<()> {
        let frame = Frame::data(self.identity.addr, dest, seq, payload);

        let conn = self.connections.lookup(dest)?;
        let link = self.router.origination_link(conn.link());
        let link_info = Self::link_info(&self.link_infos, link)?;
        let timeout = estimate_timeout(frame.serialized_len(), link_info, self.config.retransmit_safety_factor);

        let timer = self.timers.arm(timeout);
        if let Err(live) = conn.arq.timer_armed(timer) {
            self.timers.cancel(timer);
            return Err(NodeError::TimerAlreadyArmed { peer: dest, timer: live });
        }

        debug!(?dest, %seq, %link, len = frame.payload.len(), ?timeout, %timer, "sending data frame");
        self.write(link, &frame.to_bytes())
    }

    fn send_ack(&self, dest: NodeAddr, ack: SeqNo, link: LinkId) -> NodeResult<()> {
        debug!(?dest, %ack, %link, "sending ack");
        let frame = Frame::ack(self.identity.addr, dest, ack);
        self.write(link, &frame.to_bytes())
    }

    fn write(&self, link: LinkId, frame_buf: &[u8]) -> NodeResult<()> {
        self.physical.write_frame(link, frame_buf)
            .map_err(|e| NodeError::LinkUnavailable { link, reason: e.to_string() })
    }

    fn link_info(link_infos: &[LinkInfo], link: LinkId) -> NodeResult<&LinkInfo> {
        (link.0 as usize).checked_sub(1)
            .and_then(|idx| link_infos.get(idx))
            .ok_or_else(|| NodeError::LinkUnavailable { link, reason: "no such link".to_string() })
    }

    /// Handles a raw frame as read from `link`.
    ///
    /// Corrupted frames are rejected with [NodeError::Frame] without any further reaction, it is
    ///  up to the sender to retransmit. Duplicate data frames are acknowledged again before they
    ///  are rejected with [NodeError::UnexpectedSequence].
    pub fn on_frame_arrival(&mut self, link: LinkId, frame_buf: &[u8]) -> NodeResult<Arrival> {
        if !self.identity.has_link(link) {
            warn!(%link, "frame arrived on a link this node does not have - dropping");
            return Ok(Arrival::Dropped);
        }

        let frame = Frame::decode(frame_buf, self.config.max_payload_len)?;
        trace!(%link, ?frame, "received frame");

        if frame.dest != self.identity.addr {
            return Ok(self.forward(link, &frame, frame_buf));
        }

        match frame.kind {
            FrameKind::Ack { ack } => self.on_ack(link, frame.src, ack),
            FrameKind::Data { seq } => self.on_data(frame.src, seq, frame.payload),
        }
    }

    /// Passes the frame on as it was received. Forwarding is transparent: it does not touch any
    ///  connection, and no timer is armed.
    fn forward(&self, ingress: LinkId, frame: &Frame, frame_buf: &[u8]) -> Arrival {
        let candidates = self.router.forwarding_links(ingress);
        if candidates.is_empty() {
            debug!(src = ?frame.src, dest = ?frame.dest, "frame for another node arrived at a leaf - dropping");
            return Arrival::Dropped;
        }

        let mut links = Vec::with_capacity(candidates.len());
        for link in candidates {
            match self.write(link, frame_buf) {
                Ok(()) => {
                    debug!(src = ?frame.src, dest = ?frame.dest, kind = ?frame.kind, %ingress, %link, "forwarded frame");
                    links.push(link);
                }
                Err(e) => warn!("error forwarding frame: {}", e),
            }
        }

        if links.is_empty() {
            Arrival::Dropped
        }
        else {
            Arrival::Forwarded { links }
        }
    }

    fn on_ack(&mut self, link: LinkId, peer: NodeAddr, ack: SeqNo) -> NodeResult<Arrival> {
        let conn = self.connections.lookup(peer)?;
        match conn.arq.on_ack(ack) {
            AckOutcome::Accepted { timer } => {
                if let Some(timer) = timer {
                    self.timers.cancel(timer);
                }
                if conn.learn_link(link) {
                    debug!(?peer, %link, "learned link to peer");
                }
                debug!(?peer, %ack, %link, "ack received");
                self.gate.release(peer);
                Ok(Arrival::AckAccepted { from: peer, ack })
            }
            AckOutcome::Unexpected { expected } => {
                Err(NodeError::UnexpectedAck { peer, expected, received: ack })
            }
        }
    }

    fn on_data(&mut self, peer: NodeAddr, seq: SeqNo, payload: Bytes) -> NodeResult<Arrival> {
        if self.config.node_kind != NodeKind::Host {
            warn!(?peer, %seq, "router received a data frame addressed to it - dropping");
            return Ok(Arrival::Dropped);
        }

        let conn = self.connections.lookup_or_create(peer)?;
        if seq == conn.arq.frame_expected() {
            // a refused delivery is neither counted nor acked, so the sender will retry
            self.application.deliver(peer, &payload)
                .map_err(|e| NodeError::Delivery(e.to_string()))?;
        }
        let outcome = conn.arq.on_data(seq);
        let ack_link = self.router.origination_link(conn.link());

        self.send_ack(peer, seq, ack_link)?;

        match outcome {
            DataOutcome::Deliver => {
                debug!(?peer, %seq, len = payload.len(), "delivered data to application");
                Ok(Arrival::Delivered { from: peer, seq })
            }
            DataOutcome::Discard { expected } => {
                Err(NodeError::UnexpectedSequence { peer, expected, received: seq })
            }
        }
    }

    /// Retransmits the frame the expired timer was guarding. Returns `false` for a timer that
    ///  does not belong to any connection (anymore), i.e. one that was cancelled after it fired.
    pub fn on_timer_expiry(&mut self, timer: TimerId) -> NodeResult<bool> {
        let Some(conn) = self.connections.find_by_timer(timer) else {
            trace!(%timer, "ignoring expiry of stale timer");
            return Ok(false);
        };

        let peer = conn.peer();
        let Some((seq, payload)) = conn.arq.on_timeout(timer) else {
            return Ok(false);
        };

        info!(?peer, %seq, %timer, "timeout - retransmitting");
        self.transmit_data(peer, seq, payload)?;
        Ok(true)
    }

    pub fn connection_snapshots(&self) -> Vec<ConnectionSnapshot> {
        self.connections.iter()
            .map(|c| c.snapshot())
            .collect()
    }

    pub fn log_state(&self) {
        info!(addr = ?self.identity.addr, num_connections = self.connections.len(), "node state");
        for (i, snapshot) in self.connection_snapshots().iter().enumerate() {
            info!("conn #{}: {}", i, snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::app_gate::GateMode;
    use crate::test_util::node::{test_node, TestNode, TEST_LINK};
    use crate::util::random::{MockRandom, MOCK_RANDOM_MUTEX};
    use super::*;

    const A: NodeAddr = NodeAddr(1);
    const B: NodeAddr = NodeAddr(2);
    const C: NodeAddr = NodeAddr(3);

    fn seq(n: u32) -> SeqNo {
        SeqNo::from_raw(n).unwrap()
    }

    fn host(addr: NodeAddr, num_links: u8) -> TestNode<RngRandom> {
        test_node(addr.0, num_links, NodeConfig::new(NodeKind::Host))
    }

    fn data(src: NodeAddr, dest: NodeAddr, n: u32, payload: &'static [u8]) -> Bytes {
        Frame::data(src, dest, seq(n), Bytes::from_static(payload)).to_bytes()
    }

    fn ack(src: NodeAddr, dest: NodeAddr, n: u32) -> Bytes {
        Frame::ack(src, dest, seq(n)).to_bytes()
    }

    #[test]
    fn test_host_opens_gate_on_start() {
        let t = host(A, 1);
        assert_eq!(t.application.acceptance_changes(), vec![true]);
        assert!(t.node.accepts_message_for(B));
    }

    #[test]
    fn test_router_keeps_gate_closed() {
        let mut t = test_node::<RngRandom>(A.0, 2, NodeConfig::new(NodeKind::Router));
        assert!(t.application.acceptance_changes().is_empty());
        assert!(matches!(t.node.on_application_message(B, Bytes::from_static(b"x")), Err(NodeError::NotAHost)));
    }

    #[test]
    fn test_missing_link_info_fails_startup() {
        let physical = Arc::new(crate::test_util::layers::TrackingPhysicalLayer::new(vec![TEST_LINK]));
        let result = Node::new(
            NodeConfig::new(NodeKind::Host),
            NodeIdentity::new(A, 2).unwrap(),
            physical,
            Arc::new(crate::test_util::layers::TrackingApplicationLayer::new()),
            Arc::new(crate::test_util::layers::ManualTimerService::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_send_and_ack() {
        let mut t = host(A, 1);
        t.application.acceptance_changes();

        assert_eq!(t.node.on_application_message(B, Bytes::from_static(b"hello")).unwrap(), seq(0));

        let written = t.physical.written_frames();
        assert_eq!(written, vec![(LinkId(1), Frame::data(A, B, seq(0), Bytes::from_static(b"hello")))]);
        let armed = t.timers.armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].1, estimate_timeout(Frame::HEADER_LEN + 5, &TEST_LINK, 3));
        assert_eq!(t.application.acceptance_changes(), vec![false]);

        let arrival = t.node.on_frame_arrival(LinkId(1), &ack(B, A, 0)).unwrap();
        assert_eq!(arrival, Arrival::AckAccepted { from: B, ack: seq(0) });
        assert_eq!(t.timers.cancelled(), vec![armed[0].0]);
        assert_eq!(t.application.acceptance_changes(), vec![true]);
        assert_eq!(t.application.released(), vec![B]);

        assert_eq!(t.node.on_application_message(B, Bytes::from_static(b"again")).unwrap(), seq(1));
    }

    #[test]
    fn test_second_send_before_ack_is_rejected() {
        let mut t = host(A, 1);
        t.node.on_application_message(B, Bytes::from_static(b"first")).unwrap();
        t.physical.written();
        t.timers.armed();

        assert!(matches!(t.node.on_application_message(B, Bytes::from_static(b"second")), Err(NodeError::GateClosed(_))));
        assert!(matches!(t.node.on_application_message(C, Bytes::from_static(b"third")), Err(NodeError::GateClosed(_))));
        assert!(t.physical.written().is_empty());
        assert_eq!(t.timers.armed().len(), 0);
    }

    #[test]
    fn test_per_connection_gate_serves_peers_independently() {
        let mut config = NodeConfig::new(NodeKind::Host);
        config.gate_mode = GateMode::PerConnection;
        let mut t = test_node::<RngRandom>(A.0, 1, config);

        t.node.on_application_message(B, Bytes::from_static(b"to b")).unwrap();
        t.node.on_application_message(C, Bytes::from_static(b"to c")).unwrap();
        assert!(matches!(t.node.on_application_message(B, Bytes::from_static(b"again")), Err(NodeError::GateClosed(_))));

        t.node.on_frame_arrival(LinkId(1), &ack(B, A, 0)).unwrap();
        assert_eq!(t.node.on_application_message(B, Bytes::from_static(b"again")).unwrap(), seq(1));
        assert_eq!(t.application.acceptance_changes(), vec![true]);
        assert_eq!(t.application.released(), vec![B]);
    }

    #[test]
    fn test_rejected_submissions() {
        let mut t = host(A, 1);
        assert!(matches!(t.node.on_application_message(A, Bytes::from_static(b"x")), Err(NodeError::SelfAddressed(A))));

        let too_big = Bytes::from(vec![0u8; NodeConfig::MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(t.node.on_application_message(B, too_big), Err(NodeError::PayloadTooLarge { .. })));

        // the gate is untouched by rejected submissions
        assert!(t.node.accepts_message_for(B));
    }

    #[test]
    fn test_capacity_exceeded_reopens_gate() {
        let mut config = NodeConfig::new(NodeKind::Host);
        config.max_connections = 1;
        let mut t = test_node::<RngRandom>(A.0, 1, config);

        t.node.on_application_message(B, Bytes::from_static(b"x")).unwrap();
        t.node.on_frame_arrival(LinkId(1), &ack(B, A, 0)).unwrap();

        match t.node.on_application_message(C, Bytes::from_static(b"y")) {
            Err(NodeError::CapacityExceeded { capacity: 1, peer }) => assert_eq!(peer, C),
            other => panic!("expected capacity error, was {:?}", other),
        }
        assert!(t.node.accepts_message_for(B));
    }

    #[test]
    fn test_capacity_exceeded_for_inbound_peer() {
        let mut config = NodeConfig::new(NodeKind::Host);
        config.max_connections = 1;
        let mut t = test_node::<RngRandom>(A.0, 1, config);

        t.node.on_frame_arrival(LinkId(1), &data(B, A, 0, b"x")).unwrap();
        assert_eq!(t.application.delivered(), vec![(B, b"x".to_vec())]);
        assert_eq!(t.physical.written().len(), 1);

        match t.node.on_frame_arrival(LinkId(1), &data(C, A, 0, b"y")) {
            Err(NodeError::CapacityExceeded { capacity: 1, peer }) => assert_eq!(peer, C),
            other => panic!("expected capacity error, was {:?}", other),
        }
        assert!(t.application.delivered().is_empty());
        assert!(t.physical.written().is_empty());
        assert_eq!(t.node.connection_snapshots().len(), 1);
    }

    #[test]
    fn test_duplicates_are_delivered_once_and_always_acked() {
        let mut t = host(A, 1);

        let mut results = Vec::new();
        for (n, payload) in [(0, b"m0"), (0, b"m0"), (1, b"m1"), (2, b"m2"), (2, b"m2"), (3, b"m3")] {
            results.push(t.node.on_frame_arrival(LinkId(1), &data(B, A, n, payload)));
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
        assert!(matches!(results[1], Err(NodeError::UnexpectedSequence { expected, received, .. }) if expected == seq(1) && received == seq(0)));
        assert!(matches!(results[4], Err(NodeError::UnexpectedSequence { .. })));

        assert_eq!(t.application.delivered(), vec![
            (B, b"m0".to_vec()),
            (B, b"m1".to_vec()),
            (B, b"m2".to_vec()),
            (B, b"m3".to_vec()),
        ]);

        let acks = t.physical.written_frames().into_iter()
            .map(|(_, f)| f.kind)
            .collect::<Vec<_>>();
        assert_eq!(acks, [0, 0, 1, 2, 2, 3].iter().map(|&n| FrameKind::Ack { ack: seq(n) }).collect::<Vec<_>>());

        // receiving data arms no timer
        assert!(t.timers.armed().is_empty());
    }

    #[test]
    fn test_out_of_order_is_acked_not_delivered() {
        let mut t = host(A, 1);
        assert!(t.node.on_frame_arrival(LinkId(1), &data(B, A, 1, b"early")).is_err());

        assert!(t.application.delivered().is_empty());
        assert_eq!(t.physical.written_frames(), vec![(LinkId(1), Frame::ack(A, B, seq(1)))]);
    }

    #[test]
    fn test_refused_delivery_is_not_acked() {
        let mut t = host(A, 1);
        t.application.set_refuse_delivery(true);

        assert!(matches!(t.node.on_frame_arrival(LinkId(1), &data(B, A, 0, b"x")), Err(NodeError::Delivery(_))));
        assert!(t.physical.written().is_empty());

        t.application.set_refuse_delivery(false);
        assert_eq!(t.node.on_frame_arrival(LinkId(1), &data(B, A, 0, b"x")).unwrap(), Arrival::Delivered { from: B, seq: seq(0) });
    }

    #[test]
    fn test_timeout_retransmits_same_frame() {
        let mut t = host(A, 1);
        t.node.on_application_message(B, Bytes::from_static(b"payload")).unwrap();
        let original = t.physical.written();

        let mut timer = t.timers.armed()[0].0;
        for _ in 0..5 {
            assert!(t.node.on_timer_expiry(timer).unwrap());
            assert_eq!(t.physical.written(), original);

            let armed = t.timers.armed();
            assert_eq!(armed.len(), 1);
            assert_ne!(armed[0].0, timer);
            timer = armed[0].0;
        }

        t.node.on_frame_arrival(LinkId(1), &ack(B, A, 0)).unwrap();
        assert_eq!(t.timers.cancelled(), vec![timer]);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let mut t = host(A, 1);
        t.node.on_application_message(B, Bytes::from_static(b"x")).unwrap();
        let timer = t.timers.armed()[0].0;
        t.node.on_frame_arrival(LinkId(1), &ack(B, A, 0)).unwrap();
        t.physical.written();

        assert!(!t.node.on_timer_expiry(timer).unwrap());
        assert!(t.physical.written().is_empty());
    }

    #[test]
    fn test_unexpected_ack_is_ignored() {
        let mut t = host(A, 1);
        t.node.on_application_message(B, Bytes::from_static(b"x")).unwrap();

        assert!(matches!(t.node.on_frame_arrival(LinkId(1), &ack(B, A, 5)), Err(NodeError::UnexpectedAck { .. })));
        assert!(t.timers.cancelled().is_empty());
        assert!(!t.node.accepts_message_for(B));
    }

    #[test]
    fn test_ack_from_unknown_peer() {
        let mut t = host(A, 1);
        assert!(matches!(t.node.on_frame_arrival(LinkId(1), &ack(C, A, 0)), Err(NodeError::NotFound(C))));
        assert!(t.node.connection_snapshots().is_empty());
    }

    #[test]
    fn test_corrupted_frame_is_discarded() {
        let mut t = host(A, 1);
        let mut buf = data(B, A, 0, b"hello").to_vec();
        buf[Frame::HEADER_LEN] ^= 0x10;

        assert!(matches!(t.node.on_frame_arrival(LinkId(1), &buf), Err(NodeError::Frame(_))));
        assert!(t.application.delivered().is_empty());
        assert!(t.physical.written().is_empty());
        assert!(t.node.connection_snapshots().is_empty());
    }

    #[rstest::rstest]
    #[case::data(data(A, C, 3, b"through"))]
    #[case::ack(ack(C, A, 7))]
    fn test_forwarding_preserves_frame(#[case] frame_buf: Bytes) {
        let mut t = test_node::<RngRandom>(B.0, 2, NodeConfig::new(NodeKind::Router));

        let arrival = t.node.on_frame_arrival(LinkId(1), &frame_buf).unwrap();
        assert_eq!(arrival, Arrival::Forwarded { links: vec![LinkId(2)] });
        assert_eq!(t.physical.written(), vec![(LinkId(2), frame_buf.to_vec())]);
        assert!(t.timers.armed().is_empty());
        assert!(t.node.connection_snapshots().is_empty());
    }

    #[test]
    fn test_leaf_does_not_forward() {
        let mut t = host(B, 1);
        assert_eq!(t.node.on_frame_arrival(LinkId(1), &data(A, C, 0, b"x")).unwrap(), Arrival::Dropped);
        assert!(t.physical.written().is_empty());
    }

    #[test]
    fn test_frame_on_unknown_link_is_dropped() {
        let mut t = host(A, 1);
        assert_eq!(t.node.on_frame_arrival(LinkId(2), &data(B, A, 0, b"x")).unwrap(), Arrival::Dropped);
        assert!(t.application.delivered().is_empty());
    }

    #[test]
    fn test_router_drops_data_addressed_to_it() {
        let mut t = test_node::<RngRandom>(B.0, 2, NodeConfig::new(NodeKind::Router));
        assert_eq!(t.node.on_frame_arrival(LinkId(1), &data(A, B, 0, b"x")).unwrap(), Arrival::Dropped);
        assert!(t.physical.written().is_empty());
    }

    #[test]
    fn test_link_is_learned_from_first_ack() {
        let _lock = MOCK_RANDOM_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let ctx = MockRandom::below_context();
        // first link for the original transmission, second link for the retransmission
        let mut explored = 0usize;
        ctx.expect()
            .withf(|&upper| upper == 2)
            .times(2)
            .returning(move |_| {
                explored += 1;
                explored - 1
            });

        let mut t = test_node::<MockRandom>(A.0, 2, NodeConfig::new(NodeKind::Host));

        t.node.on_application_message(B, Bytes::from_static(b"m0")).unwrap();
        let timer = t.timers.armed()[0].0;
        t.node.on_timer_expiry(timer).unwrap();
        let links = t.physical.written().into_iter().map(|(l, _)| l).collect::<Vec<_>>();
        assert_eq!(links, vec![LinkId(1), LinkId(2)]);

        t.node.on_frame_arrival(LinkId(2), &ack(B, A, 0)).unwrap();
        assert_eq!(t.node.connection_snapshots()[0].link, Some(LinkId(2)));

        for n in 1..4 {
            t.node.on_application_message(B, Bytes::from_static(b"more")).unwrap();
            t.node.on_frame_arrival(LinkId(2), &ack(B, A, n)).unwrap();
        }
        assert!(t.physical.written().iter().all(|(l, _)| *l == LinkId(2)));
    }

    #[test]
    fn test_link_failure_keeps_frame_for_retransmission() {
        let mut t = host(A, 1);
        t.physical.fail_link(LinkId(1));

        assert!(matches!(
            t.node.on_application_message(B, Bytes::from_static(b"x")),
            Err(NodeError::LinkUnavailable { link: LinkId(1), .. })
        ));
        let armed = t.timers.armed();
        assert_eq!(armed.len(), 1);
        assert!(!t.node.accepts_message_for(B));

        let snapshot = &t.node.connection_snapshots()[0];
        assert_eq!(snapshot.next_frame_to_send, seq(1));
        assert_eq!(snapshot.ack_expected, seq(0));

        // retries keep failing, but keep the timer going
        assert!(t.node.on_timer_expiry(armed[0].0).is_err());
        assert_eq!(t.timers.armed().len(), 1);
    }

    #[test]
    fn test_timeout_scales_with_link() {
        let mut t = host(A, 1);
        t.node.on_application_message(B, Bytes::from(vec![1u8; 100])).unwrap();

        let (_, timeout) = t.timers.armed()[0];
        // 120 bytes at 1 MBit/s: 960us plus 2ms propagation, times 3
        assert_eq!(timeout, Duration::from_micros(3 * (960 + 2000)));
    }

    #[test]
    fn test_connection_snapshots() {
        let mut t = host(A, 1);
        t.node.on_application_message(B, Bytes::from_static(b"x")).unwrap();
        t.node.on_frame_arrival(LinkId(1), &ack(B, A, 0)).unwrap();
        t.node.on_frame_arrival(LinkId(1), &data(C, A, 0, b"y")).unwrap();

        let snapshots = t.node.connection_snapshots()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        assert_eq!(snapshots, vec![
            "addr=2 ack_expected=1 next_frame_to_send=1 frame_expected=0 link=1".to_string(),
            "addr=3 ack_expected=0 next_frame_to_send=0 frame_expected=1 link=unknown".to_string(),
        ]);
        t.node.log_state();
    }
}
