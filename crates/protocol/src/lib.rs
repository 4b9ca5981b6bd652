//! murmur-protocol – wire codec for Mumble's control and voice channels
//!
//! Three largely independent pieces: control-channel framing
//! ([`control`]), the voice/ping UDP packet codec ([`voice`]), and
//! OCB2-AES128 packet crypto ([`crypto`]). [`varint`] and [`registry`]
//! are shared building blocks the other three sit on top of.

pub mod control;
pub mod crypto;
pub mod registry;
pub mod varint;
pub mod voice;

pub use control::{decode_payload, encode_frame, encode_udp_tunnel, ControlDecoder, RawFrame};
pub use crypto::{CryptState, CryptStats};
pub use registry::{MessageName, Payload, Registry, RegistryBuilder, Schema};
pub use varint::{decode_varint, encode_varint};
pub use voice::{CodecId, DecodedVoice, Direction, FramePayload, PingPacket, Target, VoiceCodec, VoicePacket};
