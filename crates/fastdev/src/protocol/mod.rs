//! Protocol tags and their matching/labelling hooks.

use std::collections::HashMap;
use std::sync::Arc;

use fastdev_wire::{FlatMap, Message};
use parking_lot::RwLock;

use crate::EngineError;

mod apcu;
mod http;
mod redis;
mod sql;

pub use apcu::Apcu;
pub use http::Http;
pub use redis::Redis;
pub use sql::Sql;

pub mod tags {
    pub const HTTP: &str = "HTTP";
    pub const REDIS: &str = "REDIS";
    pub const SQL: &str = "SQL";
    /// Used by the memo cache to record its own hits.
    pub const APCU: &str = "APCU";
}

/// Characters of the request used as label when a protocol has no better
/// idea.
pub const DEFAULT_LABEL_CHARS: usize = 4;

pub fn default_label(request: &Message) -> String {
    request.to_text().chars().take(DEFAULT_LABEL_CHARS).collect()
}

/// Per-protocol hooks. Flattening hooks return `None` when the protocol
/// opts out of field-level inspection.
pub trait Protocol: Send + Sync {
    /// Whether replay verification should diff this protocol's payloads.
    fn should_diff(&self) -> bool {
        false
    }

    /// Short grouping key used to pre-filter replay candidates.
    fn label(&self, request: &Message) -> String {
        default_label(request)
    }

    fn flat_request(&self, request: &Message) -> Option<FlatMap> {
        let _ = request;
        None
    }

    fn flat_response(&self, response: &Message) -> Option<FlatMap> {
        let _ = response;
        None
    }
}

/// Tag to protocol map. A tag can be registered once per registry.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: RwLock<HashMap<String, Arc<dyn Protocol>>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut protocols: HashMap<String, Arc<dyn Protocol>> = HashMap::new();
        protocols.insert(tags::HTTP.to_string(), Arc::new(Http));
        protocols.insert(tags::REDIS.to_string(), Arc::new(Redis));
        protocols.insert(tags::SQL.to_string(), Arc::new(Sql));
        protocols.insert(tags::APCU.to_string(), Arc::new(Apcu));
        Self {
            protocols: RwLock::new(protocols),
        }
    }

    pub fn register(
        &self,
        tag: impl Into<String>,
        protocol: impl Protocol + 'static,
    ) -> Result<(), EngineError> {
        let tag = tag.into();
        let mut protocols = self.protocols.write();
        if protocols.contains_key(&tag) {
            return Err(EngineError::ProtocolAlreadyRegistered(tag));
        }
        protocols.insert(tag, Arc::new(protocol));
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols.read().get(tag).cloned()
    }

    pub fn require(&self, tag: &str) -> Result<Arc<dyn Protocol>, EngineError> {
        self.get(tag)
            .ok_or_else(|| EngineError::InvalidProtocol(tag.to_string()))
    }

    /// The label `tag` assigns to `request`, falling back to
    /// [`default_label`] for unregistered tags.
    pub fn label_for(&self, tag: &str, request: &Message) -> String {
        match self.get(tag) {
            Some(protocol) => protocol.label(request),
            None => default_label(request),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.protocols.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

fn first_word_upper(text: &str) -> String {
    text.split_whitespace()
        .next()
        .map(str::to_ascii_uppercase)
        .unwrap_or_default()
}
