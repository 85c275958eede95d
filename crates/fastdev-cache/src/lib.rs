//! Single-flight memo cache with per-entry expiry.
//!
//! Each key maps to one entry with its own lock, so different keys load in
//! parallel while concurrent loads of one key collapse onto a single loader.
//! [`EngineCache`] adds the record/replay bridge: hits are recorded as `APCU`
//! actions, and replays answer from those actions before any loader runs.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use fastdev_context::Context;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

mod bridge;
mod entry;
mod error;
mod result;


pub use bridge::EngineCache;
pub use error::CacheError;
pub use result::{CacheResult, TypedValue};

use entry::{Entry, LoadingGuard, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// The load failed; nothing was cached.
    None,
    /// Served from the entry, or from a load another caller ran.
    Cache,
    /// This caller ran the loader.
    Source,
}

impl LoadType {
    pub fn of(result: &Result<Loaded, CacheError>) -> Self {
        match result {
            Ok(loaded) => loaded.load_type,
            Err(_) => LoadType::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub load_type: LoadType,
    pub value: CacheResult,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Zero means never.
    pub expire_after_write: Duration,
}

impl LoadOptions {
    pub fn expire_after_write(ttl: Duration) -> Self {
        Self {
            expire_after_write: ttl,
        }
    }
}

type Shard = Mutex<HashMap<String, Arc<Entry>>>;

pub struct MemoCache {
    shards: Vec<Shard>,
}

impl Default for MemoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoCache {
    pub fn new() -> Self {
        Self::with_shards(1)
    }

    /// Hash-partitions keys over `shards` independent maps.
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Returns the fresh value under `key`, waits for an in-flight load of
    /// it, or runs `loader` and caches what it returns.
    ///
    /// A failed load caches nothing and hands its error to every waiter.
    /// If the loading future is dropped, waiters retry and one of them runs
    /// its own loader.
    pub async fn load<F, Fut>(
        &self,
        ctx: &Context,
        key: &str,
        loader: F,
        options: LoadOptions,
    ) -> Result<Loaded, CacheError>
    where
        F: FnOnce(Context, String) -> Fut,
        Fut: Future<Output = Result<CacheResult, CacheError>>,
    {
        let (entry, tx) = loop {
            let mut rx = {
                // Shard then state, the order eviction takes them in, so the
                // entry transitioned here is still the one mapped to `key`.
                let mut shard = self.shard(key).lock();
                let entry = shard
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Entry::new()))
                    .clone();
                let mut state = entry.state.lock();
                if let Some(value) = state.fresh(Instant::now()) {
                    return Ok(Loaded {
                        load_type: LoadType::Cache,
                        value: value.clone(),
                    });
                }
                match &*state {
                    State::Loading(rx) => rx.clone(),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        *state = State::Loading(rx);
                        drop(state);
                        break (entry, tx);
                    }
                }
            };

            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => {
                    debug!(key, "loader abandoned, retrying");
                    continue;
                }
            };
            match outcome {
                Some(Ok(value)) => {
                    debug!(key, "served by in-flight load");
                    return Ok(Loaded {
                        load_type: LoadType::Cache,
                        value,
                    });
                }
                Some(Err(err)) => return Err(err),
                None => continue,
            }
        };

        let guard = LoadingGuard::new(&entry);
        let result = loader(ctx.clone(), key.to_string()).await;
        guard.disarm();

        {
            let mut state = entry.state.lock();
            let keep = !entry.discard.swap(false, Ordering::AcqRel);
            *state = match &result {
                Ok(value) if keep => State::Ready {
                    value: value.clone(),
                    written_at: Instant::now(),
                    expire_after_write: options.expire_after_write,
                },
                _ => State::Idle,
            };
        }
        tx.send_replace(Some(result.clone()));

        match result {
            Ok(value) => {
                debug!(key, "loaded from source");
                Ok(Loaded {
                    load_type: LoadType::Source,
                    value,
                })
            }
            Err(err) => {
                debug!(key, %err, "load failed");
                Err(err)
            }
        }
    }

    /// Whether `key` holds a fresh value. An expired value is evicted.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<CacheResult> {
        let mut shard = self.shard(key).lock();
        let entry = shard.get(key)?.clone();
        let state = entry.state.lock();
        if let Some(value) = state.fresh(Instant::now()) {
            return Some(value.clone());
        }
        if state.is_expired(Instant::now()) {
            drop(state);
            shard.remove(key);
        }
        None
    }

    /// Drops the value under `key`. An in-flight load still completes for
    /// its callers but is not kept.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut shard = self.shard(key).lock();
        let Some(entry) = shard.get(key) else {
            return false;
        };
        let state = entry.state.lock();
        if state.is_loading() {
            // Stays mapped so later callers keep waiting on this load.
            entry.discard.store(true, Ordering::Release);
            return true;
        }
        drop(state);
        shard.remove(key);
        true
    }

    /// Evicts expired and idle entries, returning how many were removed.
    /// Entries that are loading are never evicted.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, entry| {
                let state = entry.state.lock();
                !(state.is_expired(now) || matches!(*state, State::Idle))
            });
            removed += before - shard.len();
        }
        removed
    }

    /// Number of keys holding a fresh value.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|entry| entry.state.lock().fresh(now).is_some())
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
