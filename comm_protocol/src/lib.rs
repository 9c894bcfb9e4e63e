// lib.rs — Shared uplink/downlink protocol: frame envelope, telecommands, AEAD

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

// =============================== Constants ==================================

pub const PROTOCOL_VERSION: u16 = 1;

/// Fixed magic value marking the start of every frame.
pub const FRAME_PREAMBLE: u32 = 0x5A54_C0DE;

/// Link-imposed ceiling on a single frame's payload (header excluded).
pub const MAX_FRAME_SIZE: usize = 4096;

/// preamble (4) + checksum (4) + topic tag (2) + message tag (2)
pub const HEADER_LEN: usize = 12;

pub const DEFAULT_SATELLITE_PORT: u16 = 7890;
pub const DEFAULT_GROUND_PORT: u16 = 7891;

// ================================ Errors ====================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),
    #[error("payload checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("payload decryption failed")]
    DecryptFailed,
    #[error("unknown message tag {0:#06x}")]
    UnknownMessageTag(u16),
    #[error("output buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    #[error("payload of {0} bytes exceeds MAX_FRAME_SIZE")]
    FrameTooLarge(usize),
    #[error("empty input")]
    NullInput,
    #[error("body encoding: {0}")]
    BodyEncoding(String),
}

impl FrameError {
    /// Stable numeric code carried in Nack responses.
    pub fn code(&self) -> u16 {
        match self {
            FrameError::MalformedHeader(_) => 1,
            FrameError::ChecksumMismatch { .. } => 2,
            FrameError::DecryptFailed => 3,
            FrameError::UnknownMessageTag(_) => 4,
            FrameError::BufferTooSmall { .. } => 5,
            FrameError::FrameTooLarge(_) => 6,
            FrameError::NullInput => 7,
            FrameError::BodyEncoding(_) => 8,
        }
    }
}

// ============================= Tag namespaces ===============================

/// Coarse message category. The topic is the high byte of the message tag,
/// so the two namespaces can never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Telecommand = 0x01,
    Telemetry = 0x02,
    FileTransfer = 0x03,
}

impl Topic {
    pub fn from_tag(tag: u16) -> Option<Topic> {
        match tag >> 8 {
            0x01 => Some(Topic::Telecommand),
            0x02 => Some(Topic::Telemetry),
            0x03 => Some(Topic::FileTransfer),
            _ => None,
        }
    }
}

/// Exact message type within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageTag {
    // 0x01xx — telecommands (ground → satellite)
    Ack = 0x0101,
    Nack = 0x0102,
    BeginPass = 0x0103,
    BeginFileTransfer = 0x0104,
    CeaseTransmission = 0x0105,
    ResumeTransmission = 0x0106,
    UpdateTime = 0x0107,
    Reset = 0x0108,
    // 0x02xx — telemetry (satellite → ground)
    TelemetryBatch = 0x0201,
    EventLog = 0x0202,
    PayloadImage = 0x0203,
    // 0x03xx — file transfer bookkeeping
    FileSegment = 0x0301,
}

impl MessageTag {
    pub fn from_u16(raw: u16) -> Option<MessageTag> {
        Some(match raw {
            0x0101 => MessageTag::Ack,
            0x0102 => MessageTag::Nack,
            0x0103 => MessageTag::BeginPass,
            0x0104 => MessageTag::BeginFileTransfer,
            0x0105 => MessageTag::CeaseTransmission,
            0x0106 => MessageTag::ResumeTransmission,
            0x0107 => MessageTag::UpdateTime,
            0x0108 => MessageTag::Reset,
            0x0201 => MessageTag::TelemetryBatch,
            0x0202 => MessageTag::EventLog,
            0x0203 => MessageTag::PayloadImage,
            0x0301 => MessageTag::FileSegment,
            _ => return None,
        })
    }

    pub fn topic(self) -> Topic {
        match self {
            MessageTag::Ack
            | MessageTag::Nack
            | MessageTag::BeginPass
            | MessageTag::BeginFileTransfer
            | MessageTag::CeaseTransmission
            | MessageTag::ResumeTransmission
            | MessageTag::UpdateTime
            | MessageTag::Reset => Topic::Telecommand,
            MessageTag::TelemetryBatch | MessageTag::EventLog | MessageTag::PayloadImage => {
                Topic::Telemetry
            }
            MessageTag::FileSegment => Topic::FileTransfer,
        }
    }
}

// ============================ Body serialization ============================

pub fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, FrameError> {
    bincode::serde::encode_to_vec(body, bincode::config::standard())
        .map_err(|e| FrameError::BodyEncoding(e.to_string()))
}

pub fn decode_body<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    let (body, _read) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| FrameError::BodyEncoding(e.to_string()))?;
    Ok(body)
}

// =============================== Telecommands ===============================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetTarget {
    Obc,
    Radio,
    Payload,
    Eps,
}

/// Closed set of ground-originated instructions. The message tag on the
/// envelope selects the variant; the payload carries only that variant's
/// fields (no inner discriminant on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Telecommand {
    Ack { code: u16 },
    Nack { code: u16 },
    BeginPass { pass_length_s: u32 },
    BeginFileTransfer,
    CeaseTransmission { duration_s: u32 },
    ResumeTransmission,
    UpdateTime { unix_epoch_s: u64 },
    Reset { target: ResetTarget, hard: bool },
}

impl Telecommand {
    pub fn tag(&self) -> MessageTag {
        match self {
            Telecommand::Ack { .. } => MessageTag::Ack,
            Telecommand::Nack { .. } => MessageTag::Nack,
            Telecommand::BeginPass { .. } => MessageTag::BeginPass,
            Telecommand::BeginFileTransfer => MessageTag::BeginFileTransfer,
            Telecommand::CeaseTransmission { .. } => MessageTag::CeaseTransmission,
            Telecommand::ResumeTransmission => MessageTag::ResumeTransmission,
            Telecommand::UpdateTime { .. } => MessageTag::UpdateTime,
            Telecommand::Reset { .. } => MessageTag::Reset,
        }
    }

    pub fn encode(&self) -> Result<(MessageTag, Vec<u8>), FrameError> {
        let payload = match *self {
            Telecommand::Ack { code } | Telecommand::Nack { code } => encode_body(&code)?,
            Telecommand::BeginPass { pass_length_s } => encode_body(&pass_length_s)?,
            Telecommand::BeginFileTransfer | Telecommand::ResumeTransmission => Vec::new(),
            Telecommand::CeaseTransmission { duration_s } => encode_body(&duration_s)?,
            Telecommand::UpdateTime { unix_epoch_s } => encode_body(&unix_epoch_s)?,
            Telecommand::Reset { target, hard } => encode_body(&(target, hard))?,
        };
        Ok((self.tag(), payload))
    }

    /// Decoding is total: every known telecommand tag maps to exactly one
    /// variant, anything else is an explicit error.
    pub fn decode(tag: MessageTag, payload: &[u8]) -> Result<Telecommand, FrameError> {
        Ok(match tag {
            MessageTag::Ack => Telecommand::Ack { code: decode_body(payload)? },
            MessageTag::Nack => Telecommand::Nack { code: decode_body(payload)? },
            MessageTag::BeginPass => Telecommand::BeginPass {
                pass_length_s: decode_body(payload)?,
            },
            MessageTag::BeginFileTransfer => Telecommand::BeginFileTransfer,
            MessageTag::CeaseTransmission => Telecommand::CeaseTransmission {
                duration_s: decode_body(payload)?,
            },
            MessageTag::ResumeTransmission => Telecommand::ResumeTransmission,
            MessageTag::UpdateTime => Telecommand::UpdateTime {
                unix_epoch_s: decode_body(payload)?,
            },
            MessageTag::Reset => {
                let (target, hard) = decode_body(payload)?;
                Telecommand::Reset { target, hard }
            }
            other => return Err(FrameError::UnknownMessageTag(other as u16)),
        })
    }
}

// ============================= Telemetry bodies =============================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Thermal,
    Power,
    Attitude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: u32,
    pub kind: SensorKind,
    pub timestamp_s: u64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub sequence: u64,
    pub readings: Vec<SensorReading>,
}

// ================================ Frame codec ===============================

/// Parsed view of one frame; the payload borrows from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub topic: u16,
    pub tag: u16,
    pub payload: &'a [u8],
}

/// Stateless wrap/unwrap of the fixed header. Pure transform, shared by the
/// uplink and downlink paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    fn checksum(payload: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    /// Wrap `payload` under `tag`. The topic field is derived from the tag.
    pub fn generate(&self, tag: MessageTag, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&FRAME_PREAMBLE.to_be_bytes());
        out.extend_from_slice(&Self::checksum(payload).to_be_bytes());
        out.extend_from_slice(&(tag.topic() as u16).to_be_bytes());
        out.extend_from_slice(&(tag as u16).to_be_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Same as `generate` but writes into a caller-supplied buffer.
    pub fn generate_into(
        &self,
        tag: MessageTag,
        payload: &[u8],
        buf: &mut [u8],
    ) -> Result<usize, FrameError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        let need = HEADER_LEN + payload.len();
        if buf.len() < need {
            return Err(FrameError::BufferTooSmall { need, have: buf.len() });
        }
        buf[0..4].copy_from_slice(&FRAME_PREAMBLE.to_be_bytes());
        buf[4..8].copy_from_slice(&Self::checksum(payload).to_be_bytes());
        buf[8..10].copy_from_slice(&(tag.topic() as u16).to_be_bytes());
        buf[10..12].copy_from_slice(&(tag as u16).to_be_bytes());
        buf[HEADER_LEN..need].copy_from_slice(payload);
        Ok(need)
    }

    /// Validate and split one frame. The payload slice borrows from `bytes`;
    /// no copy is made here.
    pub fn parse<'a>(&self, bytes: &'a [u8]) -> Result<Envelope<'a>, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::NullInput);
        }
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::MalformedHeader("short frame"));
        }
        let preamble = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if preamble != FRAME_PREAMBLE {
            return Err(FrameError::MalformedHeader("bad preamble"));
        }
        let stored = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let topic = u16::from_be_bytes([bytes[8], bytes[9]]);
        let tag = u16::from_be_bytes([bytes[10], bytes[11]]);
        let payload = &bytes[HEADER_LEN..];
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        let computed = Self::checksum(payload);
        if computed != stored {
            return Err(FrameError::ChecksumMismatch { stored, computed });
        }
        Ok(Envelope { topic, tag, payload })
    }
}

// ============================ AEAD crypto envelope ==========================

use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

pub const NONCE_LEN: usize = 12;
/// Poly1305 tag appended to every ciphertext.
pub const AEAD_TAG_LEN: usize = 16;

/// Payload confidentiality + authenticity. Applied to the frame payload
/// before wrapping and after parsing; the sealed form is
/// `nonce (12) || ciphertext+tag`.
#[derive(Clone)]
pub struct CryptoContext {
    key_id: u8,
    key: Key,
}

impl CryptoContext {
    pub fn new(key_id: u8, key_bytes_32: [u8; 32]) -> Self {
        Self {
            key_id,
            key: Key::from_slice(&key_bytes_32).to_owned(),
        }
    }

    pub fn key_id(&self) -> u8 {
        self.key_id
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(&self.key)
    }

    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, FrameError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plain)
            .map_err(|_| FrameError::BodyEncoding("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Authentication failure is surfaced as `DecryptFailed` and handled by
    /// callers exactly like a checksum mismatch.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, FrameError> {
        if sealed.len() < NONCE_LEN + AEAD_TAG_LEN {
            return Err(FrameError::DecryptFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| FrameError::DecryptFailed)
    }
}

// ================================ Tests =====================================
