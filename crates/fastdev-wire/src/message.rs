//! Protocol payloads and their JSON encoding.
//!
//! Strings are written bare whenever that is lossless. Payloads that are not
//! valid UTF-8, or that carry more than one `"`, are framed as `@"..."`: the
//! `@` marks the remainder as a quoted literal (see [`crate::quote`]) that is
//! unquoted on read to recover the exact bytes. A string that happens to start
//! with `@"` is framed as well, so decoding stays the inverse of encoding.

use std::borrow::Cow;
use std::fmt;

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{WireError, quote};

const FRAME_MARKER: char = '@';
const FRAME_PREFIX: &str = "@\"";

/// A captured request or response.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Raw payload bytes; the common case for wire protocols.
    Bytes(Vec<u8>),
    /// Anything else, kept as a JSON document.
    Json(serde_json::Value),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Bytes(text.into().into_bytes())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Human-readable form: bytes are decoded lossily, everything else is
    /// rendered as JSON.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes),
            Self::Bool(b) => Cow::Owned(b.to_string()),
            Self::Int(n) => Cow::Owned(n.to_string()),
            Self::Float(f) => Cow::Owned(f.to_string()),
            Self::Json(value) => Cow::Owned(value.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Json(serde_json::Value::Null) => true,
            _ => false,
        }
    }

    pub fn encode(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a document written by [`Message::encode`]: strings are unframed.
    fn from_json_value(value: serde_json::Value) -> Result<Self, WireError> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Bytes(decode_str(&s)?)),
            other => Ok(Self::from_plain_json(other)),
        }
    }

    /// Maps a caller's JSON value onto the variant decoding would produce, so
    /// a string is held as its bytes and never as `Json`.
    fn from_plain_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(number) => match (number.as_i64(), number.as_f64()) {
                (Some(n), _) => Self::Int(n),
                (None, Some(f)) if !number.is_u64() => Self::Float(f),
                _ => Self::Json(serde_json::Value::Number(number)),
            },
            serde_json::Value::String(s) => Self::Bytes(s.into_bytes()),
            other => Self::Json(other),
        }
    }
}

/// The JSON string content for `bytes`, framed only when a bare string would
/// lose information.
pub fn encode_str(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !needs_framing(text) => text.to_string(),
        _ => format!("{FRAME_MARKER}{}", quote::quote(bytes)),
    }
}

fn needs_framing(text: &str) -> bool {
    text.starts_with(FRAME_PREFIX) || text.matches('"').nth(1).is_some()
}

/// Inverse of [`encode_str`]. Strings without the `@"` prefix decode to
/// themselves.
pub fn decode_str(s: &str) -> Result<Vec<u8>, WireError> {
    match s.strip_prefix(FRAME_MARKER) {
        Some(framed) if framed.starts_with('"') => quote::unquote(framed),
        _ => Ok(s.as_bytes().to_vec()),
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(f) => Err(S::Error::custom(format!(
                "non-finite float {f} has no JSON form"
            ))),
            Self::Bytes(bytes) => serializer.serialize_str(&encode_str(bytes)),
            Self::Json(serde_json::Value::String(s)) => {
                serializer.serialize_str(&encode_str(s.as_bytes()))
            }
            Self::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json_value(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<&[u8]> for Message {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Message {
    fn from(value: &[u8; N]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<bool> for Message {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Message {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Message {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<serde_json::Value> for Message {
    fn from(value: serde_json::Value) -> Self {
        Self::from_plain_json(value)
    }
}
