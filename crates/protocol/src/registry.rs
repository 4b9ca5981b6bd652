//! Control-message registry
//!
//! Maps the 26 fixed Mumble control-message names to sequential 16-bit
//! type ids and to a pluggable `(encode, decode)` schema pair. The
//! concrete protobuf schema of each payload is deliberately out of
//! scope here — callers register their own schema per name, or
//! override the defaults.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use murmur_core::MurmurError;

/// One of the 26 fixed Mumble control-message kinds, in registry order.
///
/// Ids are assigned sequentially from 0 in the order listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageName {
    Version = 0,
    UDPTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    ACL = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
    SuggestConfig = 25,
}

/// All 26 message names, in id order.
pub const ALL_MESSAGE_NAMES: [MessageName; 26] = [
    MessageName::Version,
    MessageName::UDPTunnel,
    MessageName::Authenticate,
    MessageName::Ping,
    MessageName::Reject,
    MessageName::ServerSync,
    MessageName::ChannelRemove,
    MessageName::ChannelState,
    MessageName::UserRemove,
    MessageName::UserState,
    MessageName::BanList,
    MessageName::TextMessage,
    MessageName::PermissionDenied,
    MessageName::ACL,
    MessageName::QueryUsers,
    MessageName::CryptSetup,
    MessageName::ContextActionModify,
    MessageName::ContextAction,
    MessageName::UserList,
    MessageName::VoiceTarget,
    MessageName::PermissionQuery,
    MessageName::CodecVersion,
    MessageName::UserStats,
    MessageName::RequestBlob,
    MessageName::ServerConfig,
    MessageName::SuggestConfig,
];

impl MessageName {
    /// The 16-bit type id for this message kind.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Resolves a type id to its message name.
    pub fn from_id(id: u16) -> Option<Self> {
        ALL_MESSAGE_NAMES.get(id as usize).copied()
    }

    /// The registry string name, e.g. `"UDPTunnel"`.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageName::Version => "Version",
            MessageName::UDPTunnel => "UDPTunnel",
            MessageName::Authenticate => "Authenticate",
            MessageName::Ping => "Ping",
            MessageName::Reject => "Reject",
            MessageName::ServerSync => "ServerSync",
            MessageName::ChannelRemove => "ChannelRemove",
            MessageName::ChannelState => "ChannelState",
            MessageName::UserRemove => "UserRemove",
            MessageName::UserState => "UserState",
            MessageName::BanList => "BanList",
            MessageName::TextMessage => "TextMessage",
            MessageName::PermissionDenied => "PermissionDenied",
            MessageName::ACL => "ACL",
            MessageName::QueryUsers => "QueryUsers",
            MessageName::CryptSetup => "CryptSetup",
            MessageName::ContextActionModify => "ContextActionModify",
            MessageName::ContextAction => "ContextAction",
            MessageName::UserList => "UserList",
            MessageName::VoiceTarget => "VoiceTarget",
            MessageName::PermissionQuery => "PermissionQuery",
            MessageName::CodecVersion => "CodecVersion",
            MessageName::UserStats => "UserStats",
            MessageName::RequestBlob => "RequestBlob",
            MessageName::ServerConfig => "ServerConfig",
            MessageName::SuggestConfig => "SuggestConfig",
        }
    }
}

impl fmt::Display for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageName {
    type Err = MurmurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_MESSAGE_NAMES
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| MurmurError::UnknownMessageName(s.to_string()))
    }
}

/// A decoded, type-erased control payload.
///
/// `UDPTunnel` carries its bytes verbatim; every other message carries
/// whatever `Box<dyn Any>` its registered [`Schema`] produced. Callers
/// downcast with [`Any::downcast_ref`].
pub enum Payload {
    Tunnel(Bytes),
    Typed(Box<dyn Any + Send>),
}

/// A pluggable (encode, decode) pair for one message name.
pub struct Schema {
    encode: Box<dyn Fn(&dyn Any) -> Result<Vec<u8>, String> + Send + Sync>,
    decode: Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, String> + Send + Sync>,
}

impl Schema {
    /// Builds a schema from a pair of ordinary encode/decode closures.
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&dyn Any) -> Result<Vec<u8>, String> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<Box<dyn Any + Send>, String> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

/// The name-to-id-to-schema table backing control-message encode/decode.
pub struct Registry {
    schemas: HashMap<MessageName, Schema>,
}

impl Registry {
    /// Builds the default registry: all 26 names resolvable by id and
    /// name, with `UDPTunnel`'s schema wired to the identity byte-string
    /// passthrough. No other message has a default schema installed —
    /// callers register one for every message they actually encode or
    /// decode via [`RegistryBuilder`].
    pub fn new() -> Self {
        RegistryBuilder::new().build()
    }

    /// Looks up the schema registered for `name`, if any.
    pub fn schema(&self, name: MessageName) -> Option<&Schema> {
        self.schemas.get(&name)
    }

    /// Encodes `payload` for `name` via its registered schema.
    ///
    /// `name == UDPTunnel` is handled by the caller before reaching this
    /// point (see [`crate::control::encode_frame`]); this only serves
    /// schema-backed messages.
    pub fn encode(&self, name: MessageName, payload: &dyn Any) -> Result<Vec<u8>, MurmurError> {
        let schema = self
            .schema(name)
            .ok_or_else(|| MurmurError::SchemaEncodeError {
                name: name.to_string(),
                reason: "no schema registered".to_string(),
            })?;
        (schema.encode)(payload).map_err(|reason| MurmurError::SchemaEncodeError {
            name: name.to_string(),
            reason,
        })
    }

    /// Decodes `bytes` for `name` via its registered schema.
    pub fn decode(&self, name: MessageName, bytes: &[u8]) -> Result<Payload, MurmurError> {
        let schema = self
            .schema(name)
            .ok_or_else(|| MurmurError::SchemaDecodeError {
                name: name.to_string(),
                reason: "no schema registered".to_string(),
            })?;
        (schema.decode)(bytes)
            .map(Payload::Typed)
            .map_err(|reason| MurmurError::SchemaDecodeError {
                name: name.to_string(),
                reason,
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`Registry`] with overridable/extra schemas.
pub struct RegistryBuilder {
    schemas: HashMap<MessageName, Schema>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Registers (or overrides) the schema for `name`.
    pub fn register(mut self, name: MessageName, schema: Schema) -> Self {
        self.schemas.insert(name, schema);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            schemas: self.schemas,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
