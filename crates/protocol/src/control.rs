//! Control-channel framing
//!
//! Every control message is a 6-byte header — a big-endian `u16` type id
//! followed by a big-endian `u32` payload length — followed by that many
//! bytes of payload. This module only frames and dispatches; it never
//! couples the codec to a socket or pipe. [`ControlDecoder`] is
//! therefore a plain push/pull transducer: feed it bytes as they
//! arrive, drain whatever complete messages are ready.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use murmur_core::MurmurError;
use tracing::trace;

use crate::registry::{MessageName, Payload, Registry};

const HEADER_LEN: usize = 6;

/// Default cap on a single control frame's payload length: 1 MiB.
///
/// The wire format's `u32` length field alone would allow up to 4 GiB;
/// a misbehaving or malicious peer announcing such a length should not
/// make us allocate for it. Callers needing a different ceiling use
/// [`ControlDecoder::with_max_frame_size`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encodes one control message's 6-byte header plus payload body.
///
/// `UDPTunnel` is handled like any other message here: its payload is
/// simply the raw tunneled voice bytes rather than a schema-encoded
/// value.
pub fn encode_frame(name: MessageName, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u16(name.id());
    out.put_u32(body.len() as u32);
    out.put_slice(body);
    out.freeze()
}

/// Encodes a `UDPTunnel` frame wrapping `voice_bytes` verbatim.
pub fn encode_udp_tunnel(voice_bytes: &[u8]) -> Bytes {
    encode_frame(MessageName::UDPTunnel, voice_bytes)
}

/// A fully-framed but not-yet-schema-decoded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub name: MessageName,
    pub body: Bytes,
}

/// Push-based control-channel decoder.
///
/// Feed arbitrarily-chunked bytes via [`push`](Self::push); it buffers
/// partial frames internally and returns every frame that became
/// complete as a result of that push. There is no `Stream`/`Decoder`
/// trait impl and no owned socket — wiring this into an actual
/// transport is left to the caller.
pub struct ControlDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl ControlDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends `chunk` to the internal buffer and drains every frame
    /// that is now complete, in arrival order.
    ///
    /// Fails with [`MurmurError::FrameTooBig`] as soon as a header
    /// announces a payload length over the configured maximum, and
    /// with [`MurmurError::UnknownMessageId`] if the type id in a
    /// header isn't one of the 26 known control messages. Either error
    /// leaves the decoder's buffered state unchanged; callers should
    /// treat the decoder as unusable afterwards since resuming mid-frame
    /// at the wrong offset would desynchronize the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, MurmurError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let type_id = u16::from_be_bytes([self.buf[0], self.buf[1]]);
            let len = u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]])
                as usize;

            if len > self.max_frame_size {
                return Err(MurmurError::FrameTooBig {
                    size: len,
                    max: self.max_frame_size,
                });
            }
            if self.buf.len() < HEADER_LEN + len {
                break;
            }

            let name = MessageName::from_id(type_id).ok_or(MurmurError::UnknownMessageId(type_id))?;
            self.buf.advance(HEADER_LEN);
            let body = self.buf.split_to(len).freeze();
            trace!(name = %name, len, "decoded control frame");
            out.push(RawFrame { name, body });
        }

        Ok(out)
    }

    /// Number of bytes currently buffered but not yet forming a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

impl Default for ControlDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a [`RawFrame`]'s body through `registry`, special-casing
/// `UDPTunnel` as a raw passthrough rather than a schema lookup.
pub fn decode_payload(frame: &RawFrame, registry: &Registry) -> Result<Payload, MurmurError> {
    if frame.name == MessageName::UDPTunnel {
        Ok(Payload::Tunnel(frame.body.clone()))
    } else {
        registry.decode(frame.name, &frame.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_six_byte_header_then_body() {
        let frame = encode_frame(MessageName::Ping, &[1, 2, 3]);
        assert_eq!(&frame[0..2], &3u16.to_be_bytes());
        assert_eq!(&frame[2..6], &3u32.to_be_bytes());
        assert_eq!(&frame[6..], &[1, 2, 3]);
    }

    #[test]
    fn scenario_c1_ping_header_bytes() {
        // Ping (id 3) with an empty body.
        let frame = encode_frame(MessageName::Ping, &[]);
        assert_eq!(&frame[..], &[0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn decodes_a_single_frame_delivered_whole() {
        let mut decoder = ControlDecoder::new();
        let frame = encode_frame(MessageName::Ping, b"hello");
        let decoded = decoder.push(&frame).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, MessageName::Ping);
        assert_eq!(&decoded[0].body[..], b"hello");
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn decodes_multiple_frames_delivered_in_one_chunk() {
        let mut decoder = ControlDecoder::new();
        let mut chunk = BytesMut::new();
        chunk.extend_from_slice(&encode_frame(MessageName::Ping, b"a"));
        chunk.extend_from_slice(&encode_frame(MessageName::Version, b"bb"));
        let decoded = decoder.push(&chunk).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].name, MessageName::Ping);
        assert_eq!(decoded[1].name, MessageName::Version);
    }

    #[test]
    fn reassembles_a_frame_delivered_one_byte_at_a_time() {
        let mut decoder = ControlDecoder::new();
        let frame = encode_frame(MessageName::TextMessage, b"hi there");
        let mut total = Vec::new();
        for byte in frame.iter() {
            total.extend(decoder.push(&[*byte]).unwrap());
        }
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].name, MessageName::TextMessage);
        assert_eq!(&total[0].body[..], b"hi there");
    }

    #[test]
    fn rejects_frames_over_the_configured_maximum() {
        let mut decoder = ControlDecoder::with_max_frame_size(4);
        let frame = encode_frame(MessageName::Ping, b"12345");
        assert!(matches!(
            decoder.push(&frame),
            Err(MurmurError::FrameTooBig { size: 5, max: 4 })
        ));
    }

    #[test]
    fn rejects_unknown_type_ids() {
        let mut decoder = ControlDecoder::new();
        let mut chunk = BytesMut::new();
        chunk.put_u16(999);
        chunk.put_u32(0);
        assert!(matches!(
            decoder.push(&chunk),
            Err(MurmurError::UnknownMessageId(999))
        ));
    }

    #[test]
    fn udp_tunnel_decodes_as_raw_bytes() {
        let registry = Registry::new();
        let frame = RawFrame {
            name: MessageName::UDPTunnel,
            body: Bytes::from_static(&[9, 8, 7]),
        };
        match decode_payload(&frame, &registry).unwrap() {
            Payload::Tunnel(bytes) => assert_eq!(&bytes[..], &[9, 8, 7]),
            Payload::Typed(_) => panic!("expected tunnel payload"),
        }
    }
}
