use bytes::Bytes;

use crate::frame::SeqNo;
use crate::layers::TimerId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArqState {
    /// no outbound frame is waiting for its ack, a new one may be sent
    Idle,
    /// one data frame is in flight, and its retransmission timer is armed (except for the short
    ///  interval between sending / timing out and re-arming)
    AwaitingAck,
}

#[derive(Debug, Eq, PartialEq)]
pub enum AckOutcome {
    /// The ack matched the outstanding frame. The returned timer (if any) is no longer tracked
    ///  and must be cancelled by the caller
    Accepted { timer: Option<TimerId> },
    Unexpected { expected: SeqNo },
}

#[derive(Debug, Eq, PartialEq)]
pub enum DataOutcome {
    /// the frame is the next in sequence, its payload goes up to the application
    Deliver,
    /// duplicate or out-of-order frame: it is discarded (but still acknowledged)
    Discard { expected: SeqNo },
}

/// Stop-and-wait state for one connection, covering both directions: the outbound half tracks the
///  single unacknowledged frame, the inbound half tracks the next expected sequence number.
///
/// This is pure bookkeeping - transmitting frames and arming / cancelling timers is the caller's
///  job, based on what these methods return.
#[derive(Debug)]
pub struct Arq {
    ack_expected: SeqNo,
    next_frame_to_send: SeqNo,
    frame_expected: SeqNo,
    /// the most recently sent message, retained for retransmission
    last_message: Bytes,
    state: ArqState,
    timer: Option<TimerId>,
}

impl Default for Arq {
    fn default() -> Self {
        Arq {
            ack_expected: SeqNo::ZERO,
            next_frame_to_send: SeqNo::ZERO,
            frame_expected: SeqNo::ZERO,
            last_message: Bytes::new(),
            state: ArqState::Idle,
            timer: None,
        }
    }
}

impl Arq {
    pub fn state(&self) -> ArqState {
        self.state
    }

    pub fn ack_expected(&self) -> SeqNo {
        self.ack_expected
    }

    pub fn next_frame_to_send(&self) -> SeqNo {
        self.next_frame_to_send
    }

    pub fn frame_expected(&self) -> SeqNo {
        self.frame_expected
    }

    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Starts sending a new message, returning its sequence number. Returns `None` if a frame is
    ///  still awaiting its ack.
    pub fn begin_send(&mut self, message: Bytes) -> Option<SeqNo> {
        if self.state != ArqState::Idle {
            return None;
        }

        let seq = self.next_frame_to_send;
        self.last_message = message;
        self.next_frame_to_send = seq.next();
        self.state = ArqState::AwaitingAck;
        Some(seq)
    }

    /// Registers the retransmission timer for the outstanding frame. Fails with the currently
    ///  live timer if there is one.
    pub fn timer_armed(&mut self, timer: TimerId) -> Result<(), TimerId> {
        if let Some(live) = self.timer {
            return Err(live);
        }
        self.timer = Some(timer);
        Ok(())
    }

    pub fn on_ack(&mut self, ack: SeqNo) -> AckOutcome {
        if self.state != ArqState::AwaitingAck || ack != self.ack_expected {
            return AckOutcome::Unexpected { expected: self.ack_expected };
        }

        self.ack_expected = self.ack_expected.next();
        self.state = ArqState::Idle;
        AckOutcome::Accepted { timer: self.timer.take() }
    }

    /// Called when a timer fires. If it is this connection's live timer, the timer is cleared and
    ///  the frame to re-send is returned: the buffered message with the sequence number that is
    ///  awaiting its ack. There is no limit on the number of retransmissions.
    pub fn on_timeout(&mut self, timer: TimerId) -> Option<(SeqNo, Bytes)> {
        if self.timer != Some(timer) || self.state != ArqState::AwaitingAck {
            return None;
        }
        self.timer = None;
        Some((self.ack_expected, self.last_message.clone()))
    }

    pub fn on_data(&mut self, seq: SeqNo) -> DataOutcome {
        if seq == self.frame_expected {
            self.frame_expected = self.frame_expected.next();
            DataOutcome::Deliver
        }
        else {
            DataOutcome::Discard { expected: self.frame_expected }
        }
    }
}
