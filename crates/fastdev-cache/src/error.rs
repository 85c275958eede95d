use std::error::Error;
use std::sync::Arc;

use fastdev::EngineError;

/// Cache failures. Cloneable so one failed load can be handed to every
/// waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cached value is a `{found}`, not a `{expected}`")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("cached value does not convert through JSON: {0}")]
    Json(Arc<serde_json::Error>),
    #[error("loader failed: {0}")]
    Loader(Arc<dyn Error + Send + Sync>),
    #[error(transparent)]
    Engine(Arc<EngineError>),
}

impl CacheError {
    /// Wraps a loader's own error.
    pub fn loader(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Loader(Arc::from(err.into()))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<EngineError> for CacheError {
    fn from(err: EngineError) -> Self {
        Self::Engine(Arc::new(err))
    }
}
