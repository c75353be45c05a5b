use std::sync::Arc;
use std::time::Duration;

use crate::node::Node;
use crate::node_config::NodeConfig;
use crate::test_util::layers::{ManualTimerService, TrackingApplicationLayer, TrackingPhysicalLayer};
use crate::topology::{LinkInfo, NodeAddr, NodeIdentity};
use crate::util::random::Random;

/// 1 MBit/s and 2ms propagation delay
pub const TEST_LINK: LinkInfo = LinkInfo {
    bandwidth_bits_per_sec: 1_000_000,
    propagation_delay: Duration::from_millis(2),
};

/// A [Node] wired to recording test doubles, which stay accessible for assertions
pub struct TestNode<R: Random> {
    pub node: Node<R>,
    pub physical: Arc<TrackingPhysicalLayer>,
    pub application: Arc<TrackingApplicationLayer>,
    pub timers: Arc<ManualTimerService>,
}

/// creates a node with `num_links` links that all have [TEST_LINK]'s characteristics
pub fn test_node<R: Random>(addr: u32, num_links: u8, config: NodeConfig) -> TestNode<R> {
    let physical = Arc::new(TrackingPhysicalLayer::new(vec![TEST_LINK; num_links as usize]));
    let application = Arc::new(TrackingApplicationLayer::new());
    let timers = Arc::new(ManualTimerService::new());

    let identity = NodeIdentity::new(NodeAddr(addr), num_links)
        .expect("test nodes need at least one link");
    let node = Node::new_with_random(config, identity, physical.clone(), application.clone(), timers.clone())
        .expect("test node configuration should be valid");

    TestNode { node, physical, application, timers }
}
