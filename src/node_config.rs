use anyhow::bail;

use crate::app_gate::GateMode;
use crate::frame::Frame;
use crate::topology::NodeKind;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_kind: NodeKind,

    /// Upper bound for the number of peers a node exchanges frames with. Connections are never
    ///  evicted, so this must cover all hosts a node will ever talk to.
    pub max_connections: usize,

    /// maximum number of payload bytes in a single frame
    pub max_payload_len: usize,

    /// The retransmission timeout is the (estimated) time to transmit a frame on its outgoing
    ///  link, multiplied by this factor
    pub retransmit_safety_factor: u32,

    pub gate_mode: GateMode,
}

impl NodeConfig {
    pub const MAX_CONNECTIONS: usize = 7;
    pub const MAX_PAYLOAD_LEN: usize = 1024;

    pub fn new(node_kind: NodeKind) -> NodeConfig {
        NodeConfig {
            node_kind,
            max_connections: Self::MAX_CONNECTIONS,
            max_payload_len: Self::MAX_PAYLOAD_LEN,
            retransmit_safety_factor: 3,
            gate_mode: GateMode::Global,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            bail!("at least one connection is required");
        }
        if self.max_payload_len > Frame::MAX_PAYLOAD_LEN {
            bail!("maximum payload length {} does not fit the frame's 16 bit length field", self.max_payload_len);
        }
        if self.retransmit_safety_factor == 0 {
            bail!("a retransmit safety factor of 0 would retransmit immediately");
        }
        Ok(())
    }
}
