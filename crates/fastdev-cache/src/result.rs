//! Cached values: either a live typed value or a JSON document.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::CacheError;

const JSON_TYPE_NAME: &str = "json";

type ToJson = fn(&(dyn Any + Send + Sync)) -> Result<String, CacheError>;

/// A type-erased value that remembers how to serialize itself.
#[derive(Clone)]
pub struct TypedValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    to_json: ToJson,
}

impl TypedValue {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize + 'static>(value: &(dyn Any + Send + Sync)) -> Result<String, CacheError> {
    let value = value
        .downcast_ref::<T>()
        .ok_or(CacheError::TypeMismatch {
            expected: type_name::<T>(),
            found: "unknown",
        })?;
    Ok(serde_json::to_string(value)?)
}

#[derive(Debug, Clone)]
pub enum CacheResult {
    Typed(TypedValue),
    /// A serialized value, decoded on every load.
    Json(String),
}

impl CacheResult {
    pub fn typed<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self::Typed(TypedValue {
            value: Arc::new(value),
            type_name: type_name::<T>(),
            to_json: encode::<T>,
        })
    }

    pub fn json(json: impl Into<String>) -> Self {
        Self::Json(json.into())
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        match self {
            Self::Typed(typed) => (typed.to_json)(typed.value.as_ref()),
            Self::Json(json) => Ok(json.clone()),
        }
    }

    /// A copy of the value as a `T`. Typed values must be exactly `T`; JSON is
    /// decoded into it.
    pub fn load_into<T: DeserializeOwned + Clone + 'static>(&self) -> Result<T, CacheError> {
        match self {
            Self::Typed(typed) => typed.value.downcast_ref::<T>().cloned().ok_or(
                CacheError::TypeMismatch {
                    expected: type_name::<T>(),
                    found: typed.type_name,
                },
            ),
            Self::Json(json) => Ok(serde_json::from_str(json)?),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Typed(typed) => typed.type_name,
            Self::Json(_) => JSON_TYPE_NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    fn ada() -> User {
        User {
            id: 7,
            name: "ada".into(),
        }
    }

    #[test]
    fn typed_values_copy_out_as_their_own_type() {
        let result = CacheResult::typed(ada());
        assert_eq!(result.load_into::<User>().unwrap(), ada());
        assert_eq!(result.to_json().unwrap(), r#"{"id":7,"name":"ada"}"#);
    }

    #[test]
    fn typed_values_refuse_other_types() {
        let result = CacheResult::typed(ada());
        match result.load_into::<String>() {
            Err(CacheError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, type_name::<String>());
                assert_eq!(found, type_name::<User>());
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn json_values_decode_on_load() {
        let result = CacheResult::json(r#"{"id":7,"name":"ada"}"#);
        assert_eq!(result.load_into::<User>().unwrap(), ada());
        assert_eq!(result.type_name(), "json");
        assert!(matches!(
            result.load_into::<Vec<u8>>(),
            Err(CacheError::Json(_))
        ));
    }
}
