//! Voice and ping UDP packet codec
//!
//! Both packet kinds share one header byte: the top 3 bits select the
//! codec (or mark the packet as a ping), the bottom 5 bits select the
//! [`Target`]. Everything after the header is varint- and frame-length
//! prefixed — there is no fixed-size struct to overlay on the wire.
//!
//! Decoding a malformed packet never panics or propagates an error up
//! through a socket loop: [`VoiceCodec::decode`] swallows the error,
//! logs why, and returns `None`, since a single corrupt UDP datagram
//! must not take down a voice stream.

use murmur_core::MurmurError;
use tracing::debug;

use crate::varint::{decode_varint, encode_varint};

/// Which audio codec (or non-audio kind) a voice/ping packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    CeltAlpha = 0,
    Ping = 1,
    Speex = 2,
    CeltBeta = 3,
    Opus = 4,
}

impl CodecId {
    fn from_u8(byte: u8) -> Result<Self, MurmurError> {
        match byte {
            0 => Ok(Self::CeltAlpha),
            1 => Ok(Self::Ping),
            2 => Ok(Self::Speex),
            3 => Ok(Self::CeltBeta),
            4 => Ok(Self::Opus),
            other => Err(MurmurError::UnknownCodec(other)),
        }
    }
}

/// Routing target of a voice packet, packed into the header byte's
/// low 5 bits (values `0..=31`).
///
/// Decoding classifies the mode byte by indexing a 3-element
/// `[normal, shout, whisper]` table and defaulting to `loopback` once
/// the index runs off the end of it: mode `0` is `Normal`, `1` is
/// `Shout`, `2` is `Whisper`, and every other value (`3..=30` as well
/// as `31`) is `Loopback`. `Whisper`/`Shout` still carry the raw mode
/// byte that produced them, but since the classification collapses
/// everything outside `0..=2` to `Loopback`, only those two values ever
/// round-trip back through `Target` — which specific channels or users
/// a whisper/shout target resolves to is configured out-of-band via
/// the control channel's `VoiceTarget` message, opaque to this codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Normal,
    Whisper(u8),
    Shout(u8),
    Loopback,
}

impl Target {
    fn to_raw(self) -> u8 {
        match self {
            Target::Normal => 0,
            Target::Whisper(id) => id,
            Target::Shout(id) => id,
            Target::Loopback => 31,
        }
    }

    /// `raw` is always a 5-bit value (`0..=31`), so every input maps
    /// to a `Target` — there is no invalid case to reject.
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Target::Normal,
            1 => Target::Shout(1),
            2 => Target::Whisper(2),
            _ => Target::Loopback,
        }
    }
}

/// Which side of the connection a [`VoiceCodec`] is speaking for.
///
/// Only server-to-client voice packets carry an explicit session id;
/// client-to-server packets identify the sender implicitly via the
/// connection they arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// CELT/Speex/Opus frame data for one voice packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// At most one Opus frame — more than one is rejected with
    /// [`MurmurError::OpusMultiframe`] at encode time. `end` marks the
    /// last packet of a talk spurt.
    Opus { frames: Vec<Vec<u8>>, end: bool },
    CeltAlpha { frames: Vec<Vec<u8>>, end: bool },
    CeltBeta { frames: Vec<Vec<u8>>, end: bool },
    Speex { frames: Vec<Vec<u8>>, end: bool },
}

impl FramePayload {
    fn codec_id(&self) -> CodecId {
        match self {
            FramePayload::Opus { .. } => CodecId::Opus,
            FramePayload::CeltAlpha { .. } => CodecId::CeltAlpha,
            FramePayload::CeltBeta { .. } => CodecId::CeltBeta,
            FramePayload::Speex { .. } => CodecId::Speex,
        }
    }
}

/// Up to three floats of positional audio, present when a voice packet
/// carries exactly 12 trailing bytes after its frame data.
pub type Position = (f32, f32, f32);

/// One decoded voice (audio) packet.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePacket {
    pub target: Target,
    /// Present only when decoded with [`Direction::ServerToClient`].
    pub session: Option<u32>,
    pub sequence: i64,
    pub frames: FramePayload,
    pub position: Option<Position>,
}

/// One decoded ping packet. Direction-agnostic: pings never carry a
/// session id or target in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPacket {
    pub timestamp: i64,
}

/// The result of a successful [`VoiceCodec`] decode.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedVoice {
    Voice(VoicePacket),
    Ping(PingPacket),
}

/// Why [`VoiceCodec::decode_result`] rejected a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceDropReason {
    Empty,
    UnknownCodec(u8),
    Truncated,
    FrameTooLarge(usize),
    OpusFrameTooLarge(usize),
    OpusMultiframe,
}

impl std::fmt::Display for VoiceDropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceDropReason::Empty => write!(f, "empty packet"),
            VoiceDropReason::UnknownCodec(id) => write!(f, "unknown codec id {id}"),
            VoiceDropReason::Truncated => write!(f, "truncated packet"),
            VoiceDropReason::FrameTooLarge(len) => {
                write!(f, "frame of {len} bytes exceeds the 127-byte limit")
            }
            VoiceDropReason::OpusFrameTooLarge(len) => {
                write!(f, "opus frame of {len} bytes exceeds the 0x1FFF-byte limit")
            }
            VoiceDropReason::OpusMultiframe => {
                write!(f, "opus voice packets carry at most one frame")
            }
        }
    }
}

impl From<MurmurError> for VoiceDropReason {
    fn from(err: MurmurError) -> Self {
        match err {
            MurmurError::UnknownCodec(id) => VoiceDropReason::UnknownCodec(id),
            MurmurError::FrameTooLarge { len } => VoiceDropReason::FrameTooLarge(len),
            MurmurError::OpusFrameTooLarge { len } => VoiceDropReason::OpusFrameTooLarge(len),
            MurmurError::OpusMultiframe => VoiceDropReason::OpusMultiframe,
            _ => VoiceDropReason::Truncated,
        }
    }
}

const OPUS_END_FLAG: i64 = 0x2000;
const OPUS_MAX_LEN: i64 = 0x1FFF;
const CELT_CONTINUATION_BIT: u8 = 0x80;
const CELT_MAX_LEN: u8 = 0x7F;

/// Encodes and decodes voice/ping UDP packets for one side of a
/// Mumble connection.
pub struct VoiceCodec {
    direction: Direction,
}

impl VoiceCodec {
    pub fn new(direction: Direction) -> Self {
        Self { direction }
    }

    /// Encodes a voice packet. `session` is written as a leading varint
    /// only for [`Direction::ServerToClient`] codecs; it is ignored
    /// entirely for client-to-server ones.
    pub fn encode_voice(
        &self,
        target: Target,
        session: Option<u32>,
        sequence: i64,
        frames: &FramePayload,
        position: Option<Position>,
    ) -> Result<Vec<u8>, MurmurError> {
        let mut out = Vec::new();
        out.push((frames.codec_id() as u8) << 5 | target.to_raw());
        if matches!(self.direction, Direction::ServerToClient) {
            // Server-to-client packets always carry a session id on the
            // wire; a caller passing `None` here is a programming error,
            // not an encodable state, so it defaults to 0 rather than
            // silently desynchronizing the decoder on the other end.
            out.extend(encode_varint(session.unwrap_or(0) as i64)?);
        }
        out.extend(encode_varint(sequence)?);
        encode_frames(frames, &mut out)?;
        if let Some((x, y, z)) = position {
            out.extend_from_slice(&x.to_be_bytes());
            out.extend_from_slice(&y.to_be_bytes());
            out.extend_from_slice(&z.to_be_bytes());
        }
        Ok(out)
    }

    /// Encodes a ping packet.
    pub fn encode_ping(&self, ping: &PingPacket) -> Result<Vec<u8>, MurmurError> {
        let mut out = vec![(CodecId::Ping as u8) << 5];
        out.extend(encode_varint(ping.timestamp)?);
        Ok(out)
    }

    /// Decodes one voice or ping packet, logging and discarding
    /// anything malformed rather than propagating an error.
    pub fn decode(&self, chunk: &[u8]) -> Option<DecodedVoice> {
        match self.decode_result(chunk) {
            Ok(packet) => Some(packet),
            Err(reason) => {
                debug!(%reason, len = chunk.len(), "dropping malformed voice packet");
                None
            }
        }
    }

    fn decode_result(&self, chunk: &[u8]) -> Result<DecodedVoice, VoiceDropReason> {
        let header = *chunk.first().ok_or(VoiceDropReason::Empty)?;
        let codec = CodecId::from_u8(header >> 5)?;
        let target = Target::from_raw(header & 0x1F);
        let mut rest = &chunk[1..];

        if codec == CodecId::Ping {
            // Trailing bytes after the timestamp are ignored.
            let (timestamp, _) = decode_varint(rest).map_err(|_| VoiceDropReason::Truncated)?;
            return Ok(DecodedVoice::Ping(PingPacket { timestamp }));
        }

        let session = if matches!(self.direction, Direction::ServerToClient) {
            let (session, n) =
                decode_varint(rest).map_err(|_| VoiceDropReason::Truncated)?;
            rest = &rest[n..];
            Some(session as u32)
        } else {
            None
        };

        let (sequence, n) = decode_varint(rest).map_err(|_| VoiceDropReason::Truncated)?;
        rest = &rest[n..];

        let (frames, consumed) = decode_frames(codec, rest)?;
        rest = &rest[consumed..];

        // Exactly 12 trailing bytes (or more — any excess beyond the three
        // floats is ignored) is a position triple; anything shorter is
        // ignored rather than rejected.
        let position = if rest.len() >= 12 {
            Some((
                f32::from_be_bytes(rest[0..4].try_into().unwrap()),
                f32::from_be_bytes(rest[4..8].try_into().unwrap()),
                f32::from_be_bytes(rest[8..12].try_into().unwrap()),
            ))
        } else {
            None
        };

        Ok(DecodedVoice::Voice(VoicePacket {
            target,
            session,
            sequence,
            frames,
            position,
        }))
    }
}

fn encode_frames(frames: &FramePayload, out: &mut Vec<u8>) -> Result<(), MurmurError> {
    match frames {
        FramePayload::Opus { frames, end } => {
            if frames.len() > 1 {
                return Err(MurmurError::OpusMultiframe);
            }
            let data = frames.first().map(Vec::as_slice).unwrap_or(&[]);
            if data.len() as i64 > OPUS_MAX_LEN {
                return Err(MurmurError::OpusFrameTooLarge { len: data.len() });
            }
            let flagged = data.len() as i64 | if *end { OPUS_END_FLAG } else { 0 };
            out.extend(encode_varint(flagged)?);
            out.extend_from_slice(data);
        }
        FramePayload::CeltAlpha { frames, end }
        | FramePayload::CeltBeta { frames, end }
        | FramePayload::Speex { frames, end } => {
            if frames.is_empty() && !end {
                return Err(MurmurError::NoFramesNoEnd);
            }
            for (i, frame) in frames.iter().enumerate() {
                if frame.len() > CELT_MAX_LEN as usize {
                    return Err(MurmurError::FrameTooLarge { len: frame.len() });
                }
                // The last real frame still carries the continuation bit
                // when the talk spurt ends here — the bare 0x00 sentinel
                // pushed below is what actually signals `end`, not a clear
                // bit on the final frame header.
                let is_final_frame = i + 1 == frames.len();
                let continuation = !is_final_frame || *end;
                let header = if continuation { CELT_CONTINUATION_BIT } else { 0 } | frame.len() as u8;
                out.push(header);
                out.extend_from_slice(frame);
            }
            if *end {
                out.push(0);
            }
        }
    }
    Ok(())
}

/// Decodes one packet's frame body, returning the payload and the
/// number of wire bytes consumed.
fn decode_frames(codec: CodecId, buf: &[u8]) -> Result<(FramePayload, usize), VoiceDropReason> {
    match codec {
        CodecId::Opus => {
            let (raw, n) = decode_varint(buf).map_err(|_| VoiceDropReason::Truncated)?;
            let end = raw & OPUS_END_FLAG != 0;
            let len = (raw & OPUS_MAX_LEN) as usize;
            let data = buf
                .get(n..n + len)
                .ok_or(VoiceDropReason::Truncated)?
                .to_vec();
            let frames = if len == 0 { Vec::new() } else { vec![data] };
            Ok((FramePayload::Opus { frames, end }, n + len))
        }
        CodecId::CeltAlpha | CodecId::CeltBeta | CodecId::Speex => {
            let mut frames = Vec::new();
            let mut offset = 0;
            let end;
            loop {
                let header = *buf.get(offset).ok_or(VoiceDropReason::Truncated)?;
                offset += 1;
                // A bare 0x00 is the talk-spurt-end sentinel, not a
                // zero-length frame — it never gets pushed to `frames`.
                if header == 0 {
                    end = true;
                    break;
                }
                let len = (header & CELT_MAX_LEN) as usize;
                let frame = buf
                    .get(offset..offset + len)
                    .ok_or(VoiceDropReason::Truncated)?
                    .to_vec();
                offset += len;
                frames.push(frame);
                if header & CELT_CONTINUATION_BIT == 0 {
                    end = false;
                    break;
                }
            }
            let builder = match codec {
                CodecId::CeltAlpha => FramePayload::CeltAlpha { frames, end },
                CodecId::CeltBeta => FramePayload::CeltBeta { frames, end },
                _ => FramePayload::Speex { frames, end },
            };
            Ok((builder, offset))
        }
        CodecId::Ping => unreachable!("ping packets never reach decode_frames"),
    }
}
