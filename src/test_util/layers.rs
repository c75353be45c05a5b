use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::bail;

use crate::frame::Frame;
use crate::layers::{ApplicationLayer, PhysicalLayer, TimerId, TimerService};
use crate::topology::{LinkId, LinkInfo, NodeAddr};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test double mutex poisoned")
}

#[derive(Debug)]
pub struct TrackingPhysicalLayer {
    link_infos: Vec<LinkInfo>,
    written: Mutex<Vec<(LinkId, Vec<u8>)>>,
    failing_links: Mutex<BTreeSet<LinkId>>,
}
impl TrackingPhysicalLayer {
    /// link `n` has `link_infos[n-1]`
    pub fn new(link_infos: Vec<LinkInfo>) -> TrackingPhysicalLayer {
        TrackingPhysicalLayer {
            link_infos,
            written: Default::default(),
            failing_links: Default::default(),
        }
    }

    /// subsequent writes to `link` fail
    pub fn fail_link(&self, link: LinkId) {
        locked(&self.failing_links).insert(link);
    }

    /// returns written frame buffers, clearing the internal buffer
    pub fn written(&self) -> Vec<(LinkId, Vec<u8>)> {
        std::mem::take(&mut *locked(&self.written))
    }

    /// like [TrackingPhysicalLayer::written], but decoding the frames
    pub fn written_frames(&self) -> Vec<(LinkId, Frame)> {
        self.written().into_iter()
            .map(|(link, buf)| (link, Frame::decode(&buf, usize::MAX).expect("node wrote an invalid frame")))
            .collect()
    }
}

impl PhysicalLayer for TrackingPhysicalLayer {
    fn write_frame(&self, link: LinkId, frame_buf: &[u8]) -> anyhow::Result<()> {
        if locked(&self.failing_links).contains(&link) {
            bail!("link {} is down", link);
        }
        locked(&self.written).push((link, frame_buf.to_vec()));
        Ok(())
    }

    fn link_info(&self, link: LinkId) -> Option<LinkInfo> {
        (link.0 as usize).checked_sub(1)
            .and_then(|idx| self.link_infos.get(idx))
            .copied()
    }
}

#[derive(Debug, Default)]
pub struct TrackingApplicationLayer {
    delivered: Mutex<Vec<(NodeAddr, Vec<u8>)>>,
    acceptance: Mutex<Vec<bool>>,
    released: Mutex<Vec<NodeAddr>>,
    refuse_delivery: AtomicBool,
}
impl TrackingApplicationLayer {
    pub fn new() -> TrackingApplicationLayer {
        Default::default()
    }

    /// returns delivered messages, clearing the internal buffer
    pub fn delivered(&self) -> Vec<(NodeAddr, Vec<u8>)> {
        std::mem::take(&mut *locked(&self.delivered))
    }

    /// returns the history of acceptance changes, clearing it
    pub fn acceptance_changes(&self) -> Vec<bool> {
        std::mem::take(&mut *locked(&self.acceptance))
    }

    /// returns the peers released for further submissions, clearing the internal buffer
    pub fn released(&self) -> Vec<NodeAddr> {
        std::mem::take(&mut *locked(&self.released))
    }

    pub fn set_refuse_delivery(&self, refuse: bool) {
        self.refuse_delivery.store(refuse, Ordering::SeqCst);
    }
}

impl ApplicationLayer for TrackingApplicationLayer {
    fn deliver(&self, from: NodeAddr, payload: &[u8]) -> anyhow::Result<()> {
        if self.refuse_delivery.load(Ordering::SeqCst) {
            bail!("application refuses delivery");
        }
        locked(&self.delivered).push((from, payload.to_vec()));
        Ok(())
    }

    fn set_acceptance(&self, enabled: bool) {
        locked(&self.acceptance).push(enabled);
    }

    fn peer_released(&self, peer: NodeAddr) {
        locked(&self.released).push(peer);
    }
}

/// Timers that never fire on their own - tests trigger expiry explicitly
#[derive(Debug, Default)]
pub struct ManualTimerService {
    next_id: AtomicU64,
    armed: Mutex<Vec<(TimerId, Duration)>>,
    cancelled: Mutex<Vec<TimerId>>,
}
impl ManualTimerService {
    pub fn new() -> ManualTimerService {
        Default::default()
    }

    /// returns armed timers in the order they were armed, clearing the internal buffer
    pub fn armed(&self) -> Vec<(TimerId, Duration)> {
        std::mem::take(&mut *locked(&self.armed))
    }

    /// returns cancelled timers, clearing the internal buffer
    pub fn cancelled(&self) -> Vec<TimerId> {
        std::mem::take(&mut *locked(&self.cancelled))
    }
}

impl TimerService for ManualTimerService {
    fn arm(&self, after: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        locked(&self.armed).push((id, after));
        id
    }

    fn cancel(&self, timer: TimerId) {
        locked(&self.cancelled).push(timer);
    }
}
