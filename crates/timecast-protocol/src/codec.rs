//! Pluggable body codecs.
//!
//! A [`Codec`] turns a structured value into frame body bytes and back.
//! Messages are converted to [`serde_json::Value`] first, so request
//! parsing and validation behave the same whatever the wire format.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// Converts structured values to bytes and back.
///
/// Implementations must be exact inverses: `decode(encode(v)) == v` for
/// every value they accept.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Encodes a value into a frame body.
    fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>>;

    /// Decodes a frame body.
    fn decode(&self, bytes: &[u8]) -> ProtocolResult<Value>;
}

/// UTF-8 JSON bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ProtocolError::encode(self.name(), e))
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::decode(self.name(), e))
    }
}

/// CBOR bodies (RFC 8949).
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(value, &mut buffer)
            .map_err(|e| ProtocolError::encode(self.name(), e))?;
        Ok(buffer)
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<Value> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::decode(self.name(), e))
    }
}

/// Codec selection, made once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Cbor,
}

impl CodecKind {
    /// Instantiates the selected codec.
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Cbor => Arc::new(CborCodec),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cbor" => Ok(Self::Cbor),
            other => Err(format!("unknown codec: {other} (expected json or cbor)")),
        }
    }
}

/// Serializes a typed message and encodes it with `codec`.
pub fn encode_message<T: Serialize>(codec: &dyn Codec, message: &T) -> ProtocolResult<Vec<u8>> {
    let value = serde_json::to_value(message).map_err(|e| ProtocolError::encode(codec.name(), e))?;
    codec.encode(&value)
}

/// Decodes a frame body with `codec` into a typed message.
pub fn decode_message<T: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> ProtocolResult<T> {
    let value = codec.decode(bytes)?;
    serde_json::from_value(value).map_err(|e| ProtocolError::decode(codec.name(), e))
}
