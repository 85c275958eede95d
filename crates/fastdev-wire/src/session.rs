use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Message, WireError};

/// Opaque 32-hex-character session identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub const LEN: usize = 32;

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(id: impl Into<String>) -> Result<Self, WireError> {
        let id = id.into();
        if id.len() == Self::LEN && id.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(id))
        } else {
            Err(WireError::SessionId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

/// One captured request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Capture order within the session, assigned by the recorder.
    #[serde(default)]
    pub id: u64,
    pub protocol: String,
    /// Matching pre-filter derived from the request; not unique.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub request: Message,
    pub response: Message,
    /// Nanoseconds since the unix epoch at capture.
    #[serde(default)]
    pub timestamp: i64,
}

impl Action {
    pub fn new(
        protocol: impl Into<String>,
        request: impl Into<Message>,
        response: impl Into<Message>,
    ) -> Self {
        Self {
            id: 0,
            protocol: protocol.into(),
            label: String::new(),
            request: request.into(),
            response: response.into(),
            timestamp: 0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// The unit of recording: the triggering inbound request plus every outbound
/// action captured while serving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "session")]
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<Action>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            inbound: None,
            actions: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Total number of captured actions, inbound included.
    pub fn len(&self) -> usize {
        self.actions.len() + usize::from(self.inbound.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the ids of inbound and outbound actions together are exactly
    /// `0..len()`.
    pub fn has_dense_ids(&self) -> bool {
        let mut ids: Vec<u64> = self
            .actions
            .iter()
            .chain(self.inbound.iter())
            .map(|action| action.id)
            .collect();
        ids.sort_unstable();
        ids.iter().enumerate().all(|(i, id)| *id == i as u64)
    }
}
