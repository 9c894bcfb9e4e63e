// Telecommand Dispatcher: validated uplink bytes → exactly one session entry
// point. Every failure is answered with a Nack; nothing is dropped silently.
use crate::errors::CommsError;
use crate::session::{ControlReply, Session};
use crate::transfer::FileTransferEngine;
use comm_protocol::{
    CryptoContext, FrameCodec, FrameError, MessageTag, Telecommand, Topic,
};
use std::time::Instant;
use tracing::{error, info};

pub struct Dispatcher {
    codec: FrameCodec,
    crypto: Option<CryptoContext>,
}

impl Dispatcher {
    pub fn new(crypto: Option<CryptoContext>) -> Self {
        Self { codec: FrameCodec, crypto }
    }

    /// Decode one uplink frame and route it. On success returns the message
    /// tag for the caller's logging; on any protocol error a Nack carrying
    /// the error code is queued for the next downlink slot.
    pub fn handle_uplink(
        &self,
        session: &mut Session,
        engine: &mut FileTransferEngine,
        now: Instant,
        bytes: &[u8],
    ) -> Result<MessageTag, CommsError> {
        let (tag, command) = match self.try_decode(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                session.queue_nack(e.code());
                return Err(CommsError::Frame(e));
            }
        };
        self.route(session, engine, now, tag, command)?;
        Ok(tag)
    }

    fn try_decode(&self, bytes: &[u8]) -> Result<(MessageTag, Telecommand), FrameError> {
        let envelope = self.codec.parse(bytes)?;
        let payload = match &self.crypto {
            Some(ctx) => ctx.open(envelope.payload)?,
            None => envelope.payload.to_vec(),
        };
        let tag = MessageTag::from_u16(envelope.tag)
            .ok_or(FrameError::UnknownMessageTag(envelope.tag))?;
        // only the telecommand topic is valid on the uplink
        if tag.topic() != Topic::Telecommand {
            return Err(FrameError::UnknownMessageTag(envelope.tag));
        }
        let command = Telecommand::decode(tag, &payload)?;
        Ok((tag, command))
    }

    fn route(
        &self,
        session: &mut Session,
        engine: &mut FileTransferEngine,
        now: Instant,
        tag: MessageTag,
        command: Telecommand,
    ) -> Result<(), CommsError> {
        match command {
            Telecommand::Ack { .. } => session.ack_received(),
            Telecommand::Nack { .. } => {
                if let Err(e) = session.nack_received() {
                    let abandoned = engine.abandon_current();
                    error!(?abandoned, "retry ceiling exceeded; message abandoned");
                    return Err(e);
                }
            }
            Telecommand::BeginPass { pass_length_s } => {
                session.begin_pass(now, pass_length_s);
                session.queue_ack(tag as u16);
            }
            Telecommand::BeginFileTransfer => {
                session.begin_file_transfer();
                session.queue_ack(tag as u16);
            }
            Telecommand::CeaseTransmission { duration_s } => {
                session.cease_transmission(now, duration_s);
                session.queue_ack(tag as u16);
            }
            Telecommand::ResumeTransmission => {
                session.resume_transmission();
                session.queue_ack(tag as u16);
            }
            Telecommand::UpdateTime { unix_epoch_s } => {
                session.update_time(unix_epoch_s);
                session.queue_ack(tag as u16);
            }
            Telecommand::Reset { target, hard } => {
                info!(?target, hard, "reset telecommand received");
                session.reset_sat(target, hard);
            }
        }
        Ok(())
    }

    /// Wrap a queued Ack/Nack for transmission.
    pub fn wrap_reply(&self, reply: ControlReply) -> Result<Vec<u8>, CommsError> {
        let command = match reply {
            ControlReply::Ack(code) => Telecommand::Ack { code },
            ControlReply::Nack(code) => Telecommand::Nack { code },
        };
        let (tag, body) = command.encode()?;
        let payload = match &self.crypto {
            Some(ctx) => ctx.seal(&body)?,
            None => body,
        };
        Ok(self.codec.generate(tag, &payload)?)
    }
}
