//! Path/value flattening for human inspection of payloads.
//!
//! Protocols parse their payloads into a [`Value`] tree and flatten it into
//! `$`-rooted paths: `$`, `$[0]`, `$.headers.host`.

use std::collections::BTreeMap;

pub type FlatMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Scalar(String),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Scalar(b.to_string()),
            serde_json::Value::Number(n) => Self::Scalar(n.to_string()),
            serde_json::Value::String(s) => Self::Scalar(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(fields) => Self::Map(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn flatten(&self) -> FlatMap {
        let mut out = FlatMap::new();
        let mut path = String::from("$");
        walk(self, &mut path, &mut out);
        out
    }
}

fn walk(value: &Value, path: &mut String, out: &mut FlatMap) {
    match value {
        Value::Null => {
            out.insert(path.clone(), "null".to_string());
        }
        Value::Scalar(s) => {
            out.insert(path.clone(), s.clone());
        }
        Value::Array(items) if items.is_empty() => {
            out.insert(path.clone(), "[]".to_string());
        }
        Value::Map(fields) if fields.is_empty() => {
            out.insert(path.clone(), "{}".to_string());
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{i}]"));
                walk(item, path, out);
                path.truncate(len);
            }
        }
        Value::Map(fields) => {
            for (key, item) in fields {
                let len = path.len();
                path.push('.');
                path.push_str(key);
                walk(item, path, out);
                path.truncate(len);
            }
        }
    }
}
