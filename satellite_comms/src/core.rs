// Single mutual-exclusion domain over Session + File Transfer Engine.
//
// The receive task, the transmit poll, and the housekeeping tick all enter
// through here; one lock linearizes every state-machine transition, so no
// task can observe a half-applied one. Nothing blocks inside the lock beyond
// bounded, synchronous computation.
use crate::config::Config;
use crate::errors::CommsError;
use crate::session::{Session, SessionEvent, SessionState, SetClock};
use crate::transfer::FileTransferEngine;
use crate::uplink::Dispatcher;
use comm_protocol::{CryptoContext, FrameError, MessageTag};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, error, info};

struct CoreState {
    session: Session,
    engine: FileTransferEngine,
}

pub struct CommCore {
    inner: Mutex<CoreState>,
    dispatcher: Dispatcher,
}

impl CommCore {
    pub fn new(cfg: &Config, crypto: Option<CryptoContext>, set_clock: SetClock) -> Self {
        Self {
            inner: Mutex::new(CoreState {
                session: Session::new(cfg.retry_ceiling, set_clock),
                engine: FileTransferEngine::new(cfg.queue_depth, cfg.max_chunk, crypto.clone()),
            }),
            dispatcher: Dispatcher::new(crypto),
        }
    }

    /// Uplink entry point, fed by the receive task.
    pub fn uplink_handle(&self, now: Instant, bytes: &[u8]) -> Result<MessageTag, CommsError> {
        let mut g = self.inner.lock();
        let CoreState { session, engine } = &mut *g;
        self.dispatcher.handle_uplink(session, engine, now, bytes)
    }

    /// Queueing entry point for telemetry collectors and payload processors.
    /// Never blocks the caller.
    pub fn add_message(&self, tag: MessageTag, body: Vec<u8>) -> Result<(), CommsError> {
        self.inner.lock().engine.add_message(tag, body)
    }

    /// Single downlink entry point, polled at a fixed cadence. Fills `buf`
    /// and returns the frame length; 0 means nothing to send this cycle.
    /// Control responses always preempt bulk data.
    pub fn get_next_frame(&self, now: Instant, buf: &mut [u8]) -> Result<usize, CommsError> {
        let mut g = self.inner.lock();
        let CoreState { session, engine } = &mut *g;

        // deadlines are enforced on every poll as well as by the tick task
        Self::log_event(session.tick(now));

        if session.is_halted() {
            return Ok(0);
        }
        match session.state() {
            SessionState::Idle | SessionState::Suspended => Ok(0),
            SessionState::ActivePass | SessionState::FileTransferActive => {
                if let Some(reply) = session.take_reply() {
                    let frame = self.dispatcher.wrap_reply(reply)?;
                    return copy_frame(buf, &frame);
                }
                if session.state() == SessionState::FileTransferActive {
                    if session.take_resend() {
                        if let Some(frame) = engine.current_frame() {
                            return copy_frame(buf, &frame);
                        }
                    }
                    if !session.awaiting_ack() {
                        if let Some(frame) = engine.next_frame()? {
                            session.mark_in_flight();
                            debug!(offset = engine.last_offset(), len = frame.len(), "file frame out");
                            return copy_frame(buf, &frame);
                        }
                    }
                }
                Ok(0)
            }
        }
    }

    /// Ack-timeout path owned by the transmit task; behaves like a Nack for
    /// the frame in flight.
    pub fn ack_timeout(&self, _now: Instant) {
        let mut g = self.inner.lock();
        let CoreState { session, engine } = &mut *g;
        if let Err(e) = session.nack_received() {
            let abandoned = engine.abandon_current();
            error!(%e, ?abandoned, "ack timeout exhausted retries");
        }
    }

    /// Housekeeping: pass-deadline and suspend-window expiry.
    pub fn tick(&self, now: Instant) {
        let mut g = self.inner.lock();
        let event = g.session.tick(now);
        if matches!(event, Some(SessionEvent::PassEnded)) && !g.engine.is_idle() {
            info!(queued = g.engine.queued(), "pass ended with transfer pending");
        }
        Self::log_event(event);
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.lock().session.is_halted()
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.inner.lock().session.awaiting_ack()
    }

    fn log_event(event: Option<SessionEvent>) {
        match event {
            Some(SessionEvent::PassEnded) => info!("pass deadline reached; back to idle"),
            Some(SessionEvent::Resumed) => info!("suspend window elapsed; resuming"),
            None => {}
        }
    }
}

fn copy_frame(buf: &mut [u8], frame: &[u8]) -> Result<usize, CommsError> {
    if buf.len() < frame.len() {
        return Err(CommsError::Frame(FrameError::BufferTooSmall {
            need: frame.len(),
            have: buf.len(),
        }));
    }
    buf[..frame.len()].copy_from_slice(frame);
    Ok(frame.len())
}
