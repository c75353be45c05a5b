//! Runs a [Node] on tokio: events are fed to the node through a channel and processed one at a
//!  time, and retransmission timers are tokio sleeps that report their expiry through the same
//!  channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::error::NodeError;
use crate::layers::{TimerId, TimerService};
use crate::node::Node;
use crate::topology::{LinkId, NodeAddr};
use crate::util::random::Random;

#[derive(Debug)]
pub enum NodeEvent {
    FrameArrived { link: LinkId, frame_buf: Bytes },
    ApplicationMessage { dest: NodeAddr, payload: Bytes },
    TimerExpired(TimerId),
    /// logs all connections' state
    DumpState,
    Shutdown,
}

/// Processes events until a [NodeEvent::Shutdown] arrives or all senders are gone. Rejected
///  events are logged, none of them terminates the loop.
pub async fn run_node<R: Random>(mut node: Node<R>, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
    let addr = node.identity().addr;
    info!(?addr, "node event loop started");

    while let Some(event) = events.recv().await {
        trace!(?addr, ?event, "processing event");
        match event {
            NodeEvent::FrameArrived { link, frame_buf } => {
                if let Err(e) = node.on_frame_arrival(link, &frame_buf) {
                    log_rejection(addr, "frame", &e);
                }
            }
            NodeEvent::ApplicationMessage { dest, payload } => {
                if let Err(e) = node.on_application_message(dest, payload) {
                    log_rejection(addr, "application message", &e);
                }
            }
            NodeEvent::TimerExpired(timer) => {
                if let Err(e) = node.on_timer_expiry(timer) {
                    log_rejection(addr, "retransmission", &e);
                }
            }
            NodeEvent::DumpState => node.log_state(),
            NodeEvent::Shutdown => {
                info!(?addr, "shutting down");
                return;
            }
        }
    }
    info!(?addr, "event channel closed, stopping");
}

fn log_rejection(addr: NodeAddr, what: &str, e: &NodeError) {
    match e {
        NodeError::UnexpectedAck { .. } | NodeError::UnexpectedSequence { .. } | NodeError::NotFound(_) => {
            debug!(?addr, "ignoring {}: {}", what, e);
        }
        NodeError::Frame(_) => info!(?addr, "discarding {}: {}", what, e),
        _ => warn!(?addr, "rejected {}: {}", what, e),
    }
}

/// Timers as tokio tasks that send [NodeEvent::TimerExpired] when they are done sleeping. The
///  service holds only a weak reference to the event channel so it does not keep the node's
///  event loop alive.
pub struct TokioTimerService {
    events: mpsc::WeakUnboundedSender<NodeEvent>,
    next_id: AtomicU64,
    pending: Arc<Mutex<FxHashMap<TimerId, JoinHandle<()>>>>,
}

impl TokioTimerService {
    pub fn new(events: &mpsc::UnboundedSender<NodeEvent>) -> TokioTimerService {
        TokioTimerService {
            events: events.downgrade(),
            next_id: AtomicU64::new(0),
            pending: Default::default(),
        }
    }

    pub fn num_pending(&self) -> usize {
        self.pending.lock().expect("timer mutex poisoned").len()
    }
}

impl TimerService for TokioTimerService {
    fn arm(&self, after: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // the lock is held while spawning so the task cannot deregister before it is registered
        let mut pending = self.pending.lock().expect("timer mutex poisoned");

        let events = self.events.clone();
        let pending_for_task = self.pending.clone();
        let handle = tokio::spawn(async move {
            sleep(after).await;
            pending_for_task.lock().expect("timer mutex poisoned").remove(&id);
            match events.upgrade() {
                Some(events) => {
                    if events.send(NodeEvent::TimerExpired(id)).is_err() {
                        debug!(timer = %id, "timer expired after the node stopped");
                    }
                }
                None => debug!(timer = %id, "timer expired after the node stopped"),
            }
        });
        pending.insert(id, handle);
        id
    }

    fn cancel(&self, timer: TimerId) {
        if let Some(handle) = self.pending.lock().expect("timer mutex poisoned").remove(&timer) {
            handle.abort();
        }
    }
}
