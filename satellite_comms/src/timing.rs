// Ack-timeout bookkeeping for the transmit task. The scheduler owns all
// waiting; the core only learns about an expiry through an explicit call.
use std::time::{Duration, Instant};

pub struct AckTimer {
    timeout: Duration,
    sent_at: Option<Instant>,
}

impl AckTimer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, sent_at: None }
    }

    /// Restart the window. Called for every transmission that expects an
    /// ack, retransmissions included.
    pub fn frame_sent(&mut self, now: Instant) {
        self.sent_at = Some(now);
    }

    /// Nothing in flight any more; stop timing.
    pub fn acked(&mut self) {
        self.sent_at = None;
    }

    /// True once the outstanding window has elapsed. The window restarts so
    /// the retry triggered by this expiry is timed from `now`.
    pub fn expired(&mut self, now: Instant) -> bool {
        match self.sent_at {
            Some(t) if now.duration_since(t) >= self.timeout => {
                self.sent_at = Some(now);
                true
            }
            _ => false,
        }
    }
}
