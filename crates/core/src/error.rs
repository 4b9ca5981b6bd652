//! Zentraler Fehler-Enum fuer murmur-wire
//!
//! Ein Fehler-Typ pro Crate, dasselbe Muster wie `speakeasy-core`:
//! `thiserror`-Ableitung, `#[error("...")]` pro Variante, und ein
//! Crate-weiter `Result`-Alias.

use thiserror::Error;

/// Globaler Result-Alias fuer murmur-wire
pub type Result<T> = std::result::Result<T, MurmurError>;

/// Alle moeglichen Fehler im murmur-wire Wire-Codec
#[derive(Debug, Error)]
pub enum MurmurError {
    // --- Varint ---
    #[error("varint truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("malformed varint prefix byte {0:#04x}")]
    Malformed(u8),

    #[error("64-bit varint values are not supported")]
    Unsupported64Bit,

    #[error("value {0} is outside the supported varint range")]
    Unsupported(i64),

    // --- ControlCodec / registry ---
    #[error("unknown control message id {0}")]
    UnknownMessageId(u16),

    #[error("unknown control message name '{0}'")]
    UnknownMessageName(String),

    #[error("schema encode failed for '{name}': {reason}")]
    SchemaEncodeError { name: String, reason: String },

    #[error("schema decode failed for '{name}': {reason}")]
    SchemaDecodeError { name: String, reason: String },

    #[error("control frame of {size} bytes exceeds the configured maximum of {max} bytes")]
    FrameTooBig { size: usize, max: usize },

    // --- VoiceCodec ---
    #[error("unknown voice codec id {0}")]
    UnknownCodec(u8),

    #[error("opus voice packets carry at most one frame")]
    OpusMultiframe,

    #[error("voice frame of {len} bytes exceeds the 127-byte CELT/Speex limit")]
    FrameTooLarge { len: usize },

    #[error("a voice packet with no frames must set end = true")]
    NoFramesNoEnd,

    #[error("opus frame of {len} bytes exceeds the 0x1FFF-byte length limit")]
    OpusFrameTooLarge { len: usize },

    // --- UdpCrypt ---
    #[error("crypto key material must be exactly 16 bytes, got {0}")]
    BadKeyLength(usize),

    #[error("CryptState is not ready: key, encrypt_iv and decrypt_iv must all be set")]
    NotReady,

    #[error("replayed packet")]
    Replay,

    #[error("nonce advanced out of the tolerable reordering window")]
    OutOfRange,

    #[error("authentication tag mismatch")]
    AuthFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_message_includes_counts() {
        let e = MurmurError::Truncated { needed: 4, have: 1 };
        assert_eq!(e.to_string(), "varint truncated: need 4 bytes, have 1");
    }

    #[test]
    fn frame_too_big_message_includes_both_sizes() {
        let e = MurmurError::FrameTooBig {
            size: 2048,
            max: 1024,
        };
        let msg = e.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn unknown_message_id_displays_numeric_id() {
        let e = MurmurError::UnknownMessageId(999);
        assert!(e.to_string().contains("999"));
    }
}
