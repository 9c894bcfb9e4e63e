// Session State Machine: pass lifecycle, suspend windows, retry accounting.
//
// Time never originates here. Every entry point that needs a clock takes
// `now` from the caller, so the scheduler owns all waiting and the machine
// can be driven through simulated time in tests.
use crate::errors::CommsError;
use chrono::DateTime;
use comm_protocol::ResetTarget;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ActivePass,
    FileTransferActive,
    Suspended,
}

/// One-shot control response queued ahead of any bulk frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Ack(u16),
    Nack(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    PassEnded,
    Resumed,
}

/// Wall-clock collaborator: applies a commanded epoch to the platform RTC.
pub type SetClock = Box<dyn FnMut(u64) + Send>;

pub struct Session {
    state: SessionState,
    /// Active state to restore when a suspend window ends.
    resume_to: SessionState,
    pass_deadline: Option<Instant>,
    suspend_until: Option<Instant>,
    retries: u32,
    retry_ceiling: u32,
    awaiting_ack: bool,
    resend_pending: bool,
    pending_reply: Option<ControlReply>,
    set_clock: SetClock,
    halted: bool,
}

impl Session {
    pub fn new(retry_ceiling: u32, set_clock: SetClock) -> Self {
        Self {
            state: SessionState::Idle,
            resume_to: SessionState::ActivePass,
            pass_deadline: None,
            suspend_until: None,
            retries: 0,
            retry_ceiling,
            awaiting_ack: false,
            resend_pending: false,
            pending_reply: None,
            set_clock,
            halted: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    // ------------------------- telecommand entry points ---------------------

    pub fn begin_pass(&mut self, now: Instant, pass_length_s: u32) {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::ActivePass;
                self.resume_to = SessionState::ActivePass;
                self.pass_deadline = Some(now + Duration::from_secs(pass_length_s as u64));
                self.retries = 0;
                info!(pass_length_s, "pass started");
            }
            SessionState::ActivePass => {
                // ground may extend a running pass
                self.pass_deadline = Some(now + Duration::from_secs(pass_length_s as u64));
                info!(pass_length_s, "pass deadline extended");
            }
            other => warn!(state = ?other, "begin_pass ignored"),
        }
    }

    pub fn begin_file_transfer(&mut self) {
        match self.state {
            SessionState::ActivePass => {
                self.state = SessionState::FileTransferActive;
                self.resume_to = SessionState::FileTransferActive;
                self.retries = 0;
                self.awaiting_ack = false;
                self.resend_pending = false;
                info!("file transfer phase started");
            }
            other => warn!(state = ?other, "begin_file_transfer ignored"),
        }
    }

    pub fn cease_transmission(&mut self, now: Instant, duration_s: u32) {
        match self.state {
            SessionState::ActivePass | SessionState::FileTransferActive => {
                self.resume_to = self.state;
                self.state = SessionState::Suspended;
                self.suspend_until = Some(now + Duration::from_secs(duration_s as u64));
                info!(duration_s, "transmission suspended");
            }
            other => warn!(state = ?other, "cease_transmission ignored"),
        }
    }

    pub fn resume_transmission(&mut self) {
        match self.state {
            SessionState::Suspended => {
                self.state = self.resume_to;
                self.suspend_until = None;
                info!(resumed_to = ?self.state, "transmission resumed");
            }
            other => warn!(state = ?other, "resume_transmission ignored"),
        }
    }

    pub fn update_time(&mut self, unix_epoch_s: u64) {
        match self.state {
            SessionState::Idle | SessionState::ActivePass => {
                (self.set_clock)(unix_epoch_s);
                let stamp = DateTime::from_timestamp(unix_epoch_s as i64, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| unix_epoch_s.to_string());
                info!(%stamp, "wall clock updated");
            }
            other => warn!(state = ?other, "update_time ignored"),
        }
    }

    /// Escape hatch: hand control to the external reboot supervisor and stop
    /// producing frames. No further bookkeeping happens here.
    pub fn reset_sat(&mut self, target: ResetTarget, hard: bool) {
        self.halted = true;
        warn!(?target, hard, "reset commanded; frame production stopped");
    }

    // ----------------------- acknowledgment bookkeeping ---------------------

    pub fn ack_received(&mut self) {
        match self.state {
            SessionState::ActivePass | SessionState::FileTransferActive => {
                self.retries = 0;
                self.awaiting_ack = false;
                self.resend_pending = false;
            }
            other => warn!(state = ?other, "stray ack ignored"),
        }
    }

    /// Negative acknowledgment or ack timeout for the frame in flight.
    /// Past the retry ceiling the in-flight message is given up on and the
    /// session falls back to `Idle`; the caller must drop the engine cursor.
    pub fn nack_received(&mut self) -> Result<(), CommsError> {
        if !matches!(
            self.state,
            SessionState::ActivePass | SessionState::FileTransferActive
        ) || !self.awaiting_ack
        {
            warn!(state = ?self.state, "stray nack ignored");
            return Ok(());
        }
        self.retries += 1;
        if self.retries > self.retry_ceiling {
            self.to_idle();
            return Err(CommsError::RetryExhausted);
        }
        self.resend_pending = true;
        Ok(())
    }

    // ------------------------------ downlink side ---------------------------

    pub fn queue_ack(&mut self, code: u16) {
        self.pending_reply = Some(ControlReply::Ack(code));
    }

    pub fn queue_nack(&mut self, code: u16) {
        self.pending_reply = Some(ControlReply::Nack(code));
    }

    pub fn take_reply(&mut self) -> Option<ControlReply> {
        self.pending_reply.take()
    }

    /// True exactly once per requested retransmission.
    pub fn take_resend(&mut self) -> bool {
        std::mem::take(&mut self.resend_pending)
    }

    pub fn mark_in_flight(&mut self) {
        self.awaiting_ack = true;
    }

    // ------------------------------ housekeeping ----------------------------

    /// Advance time-driven transitions: pass-deadline expiry and suspend
    /// windows. Safe to call from every poll; idempotent between events.
    pub fn tick(&mut self, now: Instant) -> Option<SessionEvent> {
        if self.halted {
            return None;
        }
        if self.state != SessionState::Idle {
            if let Some(deadline) = self.pass_deadline {
                if now >= deadline {
                    self.to_idle();
                    return Some(SessionEvent::PassEnded);
                }
            }
        }
        if self.state == SessionState::Suspended {
            if let Some(until) = self.suspend_until {
                if now >= until {
                    self.resume_transmission();
                    return Some(SessionEvent::Resumed);
                }
            }
        }
        None
    }

    fn to_idle(&mut self) {
        self.state = SessionState::Idle;
        self.pass_deadline = None;
        self.suspend_until = None;
        self.retries = 0;
        self.awaiting_ack = false;
        self.resend_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(3, Box::new(|_| {}))
    }

    #[test]
    fn begin_pass_then_deadline_returns_to_idle() {
        let t0 = Instant::now();
        let mut s = session();
        assert_eq!(s.state(), SessionState::Idle);

        s.begin_pass(t0, 60);
        assert_eq!(s.state(), SessionState::ActivePass);
        assert_eq!(s.tick(t0 + Duration::from_secs(59)), None);

        assert_eq!(
            s.tick(t0 + Duration::from_secs(60)),
            Some(SessionEvent::PassEnded)
        );
        assert_eq!(s.state(), SessionState::Idle);
        // idempotent after the event fired
        assert_eq!(s.tick(t0 + Duration::from_secs(61)), None);
    }

    #[test]
    fn suspend_and_resume_restore_previous_active_state() {
        let t0 = Instant::now();
        let mut s = session();
        s.begin_pass(t0, 600);
        s.begin_file_transfer();
        assert_eq!(s.state(), SessionState::FileTransferActive);

        s.cease_transmission(t0, 30);
        assert_eq!(s.state(), SessionState::Suspended);

        // explicit resume
        s.resume_transmission();
        assert_eq!(s.state(), SessionState::FileTransferActive);

        // timed resume
        s.cease_transmission(t0, 30);
        assert_eq!(
            s.tick(t0 + Duration::from_secs(30)),
            Some(SessionEvent::Resumed)
        );
        assert_eq!(s.state(), SessionState::FileTransferActive);
    }

    #[test]
    fn pass_deadline_fires_even_while_suspended() {
        let t0 = Instant::now();
        let mut s = session();
        s.begin_pass(t0, 60);
        s.cease_transmission(t0, 600);
        assert_eq!(
            s.tick(t0 + Duration::from_secs(60)),
            Some(SessionEvent::PassEnded)
        );
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn file_transfer_requires_an_active_pass() {
        let mut s = session();
        s.begin_file_transfer();
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn retry_exhaustion_reports_once_and_falls_back_to_idle() {
        let t0 = Instant::now();
        let mut s = session();
        s.begin_pass(t0, 600);
        s.begin_file_transfer();
        s.mark_in_flight();

        // ceiling is 3: three nacks schedule retransmissions
        for _ in 0..3 {
            assert_eq!(s.nack_received(), Ok(()));
            assert!(s.take_resend());
            assert_eq!(s.state(), SessionState::FileTransferActive);
        }
        // the fourth exhausts
        assert_eq!(s.nack_received(), Err(CommsError::RetryExhausted));
        assert_eq!(s.state(), SessionState::Idle);

        // no second report: session is idle, nack is stray
        assert_eq!(s.nack_received(), Ok(()));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn ack_clears_retry_state() {
        let t0 = Instant::now();
        let mut s = session();
        s.begin_pass(t0, 600);
        s.begin_file_transfer();
        s.mark_in_flight();

        assert_eq!(s.nack_received(), Ok(()));
        assert!(s.take_resend());
        s.mark_in_flight();
        s.ack_received();
        assert!(!s.awaiting_ack());

        // counter restarted: ceiling applies afresh to the next frame
        s.mark_in_flight();
        for _ in 0..3 {
            assert_eq!(s.nack_received(), Ok(()));
        }
        assert_eq!(s.nack_received(), Err(CommsError::RetryExhausted));
    }

    #[test]
    fn reset_halts_frame_production_and_timekeeping() {
        let t0 = Instant::now();
        let mut s = session();
        s.begin_pass(t0, 60);
        s.reset_sat(ResetTarget::Obc, true);
        assert!(s.is_halted());
        assert_eq!(s.tick(t0 + Duration::from_secs(120)), None);
    }

    #[test]
    fn update_time_delegates_to_the_clock_setter() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU64, Ordering};

        let applied = Arc::new(AtomicU64::new(0));
        let sink = applied.clone();
        let mut s = Session::new(3, Box::new(move |epoch| sink.store(epoch, Ordering::SeqCst)));

        s.update_time(1_700_000_000);
        assert_eq!(applied.load(Ordering::SeqCst), 1_700_000_000);

        // not applied outside Idle/ActivePass
        let t0 = Instant::now();
        s.begin_pass(t0, 600);
        s.begin_file_transfer();
        s.update_time(42);
        assert_eq!(applied.load(Ordering::SeqCst), 1_700_000_000);
    }

    #[test]
    fn control_reply_slot_holds_latest_one_shot() {
        let mut s = session();
        s.queue_ack(1);
        s.queue_nack(4);
        assert_eq!(s.take_reply(), Some(ControlReply::Nack(4)));
        assert_eq!(s.take_reply(), None);
    }
}
