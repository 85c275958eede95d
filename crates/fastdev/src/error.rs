use std::fmt;
use std::path::PathBuf;

use fastdev_context::CarrierError;
use fastdev_wire::{SessionId, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Record,
    Replay,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Record => write!(f, "record"),
            Mode::Replay => write!(f, "replay"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} mode is not enabled")]
    ModeDisabled(Mode),
    #[error("context carries no {0} session id")]
    SessionIdMissing(Mode),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("session {0} already exists")]
    SessionAlreadyExists(SessionId),
    #[error("session {0} not started")]
    SessionClosed(SessionId),
    #[error("session {0} already has an inbound action")]
    InboundAlreadyRecorded(SessionId),
    #[error("invalid protocol `{0}`")]
    InvalidProtocol(String),
    #[error("protocol `{0}` is already registered")]
    ProtocolAlreadyRegistered(String),
    #[error(transparent)]
    Carrier(#[from] CarrierError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
