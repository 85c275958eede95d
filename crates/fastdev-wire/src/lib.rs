//! On-disk and over-the-wire shapes for recorded sessions.
//!
//! Payloads captured from arbitrary protocols are carried as [`Message`]s,
//! whose JSON form survives a round trip byte for byte even when the payload
//! is not UTF-8. Sessions are plain JSON objects:
//!
//! ```json
//! {"session":"<32 hex>","inbound":{...},"actions":[{...}]}
//! ```

pub mod diff;
pub mod flat;
pub mod message;
pub mod quote;
pub mod session;
pub mod tokens;

pub use diff::{FieldDiff, diff};
pub use flat::{FlatMap, Value};
pub use message::{Message, decode_str, encode_str};
pub use session::{Action, Session, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed quoted literal at byte {offset}: {reason}")]
    Quote { offset: usize, reason: &'static str },
    #[error("malformed token list at byte {offset}: {reason}")]
    Tokens { offset: usize, reason: &'static str },
    #[error("invalid session id `{0}`: expected 32 hex characters")]
    SessionId(String),
    #[error("message cannot be encoded: {0}")]
    Encoding(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
