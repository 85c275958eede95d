use std::future::Future;
use std::sync::Arc;

use fastdev::{Engine, MatchStrategy, tags};
use fastdev_context::Context;
use fastdev_wire::{Action, Message};
use tracing::debug;

use crate::{CacheError, CacheResult, LoadOptions, LoadType, Loaded, MemoCache};

/// A [`MemoCache`] wired to the record/replay engine.
///
/// Recording captures every cache hit as an `APCU` action, key as request
/// and JSON value as response. Source loads are not captured here: the
/// backend calls the loader makes are recorded by their own adapters.
/// Replaying asks for a recorded `APCU` action before running the loader.
pub struct EngineCache {
    cache: MemoCache,
    engine: Arc<Engine>,
}

impl EngineCache {
    pub fn new(cache: MemoCache, engine: Arc<Engine>) -> Self {
        Self { cache, engine }
    }

    pub fn cache(&self) -> &MemoCache {
        &self.cache
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

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
        let engine = &self.engine;
        let loaded = self
            .cache
            .load(
                ctx,
                key,
                |ctx, key| async move {
                    if engine.modes().replay_mode() {
                        let request = Message::text(key.as_str());
                        let replayed = engine.replayer().query(
                            &ctx,
                            tags::APCU,
                            &request,
                            MatchStrategy::Exact,
                        )?;
                        if let Some(response) = replayed {
                            debug!(key, "cache value replayed");
                            return Ok(CacheResult::json(response.to_text()));
                        }
                    }
                    loader(ctx, key).await
                },
                options,
            )
            .await?;

        if loaded.load_type == LoadType::Cache && engine.modes().record_mode() {
            let response = Message::text(loaded.value.to_json()?);
            engine
                .recorder()
                .record_action(ctx, Action::new(tags::APCU, key, response))?;
        }
        Ok(loaded)
    }
}
