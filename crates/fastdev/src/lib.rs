//! Record and replay of a request's external I/O.
//!
//! While recording, adapters hand every outbound call to the [`Recorder`] of
//! the session bound to the request's context, and the triggering inbound
//! request closes the loop. While replaying, adapters ask the [`Replayer`]
//! before dialing a real backend and use the recorded response when one
//! matches.
//!
//! [`Engine`] bundles the mode switch, the protocol registry and both halves
//! so adapters can be handed one value.

use std::sync::Arc;

use fastdev_context::Carrier;
use fastdev_wire::{Action, Message};

mod error;
mod modes;
pub mod protocol;
mod recorder;
mod replayer;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{EngineError, Mode};
pub use modes::{ModeSwitch, RECORD_ENV, REPLAY_ENV, is_truthy, running_under_test_harness};
pub use protocol::{Protocol, ProtocolRegistry, tags};
pub use recorder::Recorder;
pub use replayer::{ExactMatcher, MatchStrategy, Replayer, RequestMatcher};
pub use store::{SessionDir, StoredSessionFile};

pub use fastdev_context as context;
pub use fastdev_wire as wire;

pub struct Engine {
    modes: Arc<ModeSwitch>,
    registry: Arc<ProtocolRegistry>,
    recorder: Recorder,
    replayer: Replayer,
}

impl Engine {
    /// An engine with the built-in protocols registered.
    pub fn new(modes: ModeSwitch) -> Self {
        Self::with_registry(modes, ProtocolRegistry::with_builtins())
    }

    pub fn with_registry(modes: ModeSwitch, registry: ProtocolRegistry) -> Self {
        let modes = Arc::new(modes);
        let registry = Arc::new(registry);
        Self {
            recorder: Recorder::new(modes.clone(), registry.clone()),
            replayer: Replayer::new(modes.clone(), registry.clone()),
            modes,
            registry,
        }
    }

    /// Like [`Engine::with_registry`], with a custom comparator behind
    /// [`MatchStrategy::Best`].
    pub fn with_matcher(
        modes: ModeSwitch,
        registry: ProtocolRegistry,
        matcher: impl RequestMatcher + 'static,
    ) -> Self {
        let modes = Arc::new(modes);
        let registry = Arc::new(registry);
        Self {
            recorder: Recorder::new(modes.clone(), registry.clone()),
            replayer: Replayer::with_matcher(modes.clone(), registry.clone(), matcher),
            modes,
            registry,
        }
    }

    /// Modes from `GS_FASTDEV_RECORD` / `GS_FASTDEV_REPLAY`.
    pub fn from_env() -> Self {
        Self::new(ModeSwitch::init_from_env())
    }

    pub fn modes(&self) -> &ModeSwitch {
        &self.modes
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn replayer(&self) -> &Replayer {
        &self.replayer
    }

    /// Records `action` when record mode is on. Returns the assigned id, or
    /// `None` when recording is off.
    pub fn maybe_record(
        &self,
        ctx: &impl Carrier,
        action: Action,
    ) -> Result<Option<u64>, EngineError> {
        if !self.modes.record_mode() {
            return Ok(None);
        }
        self.recorder.record_action(ctx, action).map(Some)
    }

    /// Exact-match replay when replay mode is on; `None` otherwise or on a
    /// miss.
    pub fn maybe_replay(
        &self,
        ctx: &impl Carrier,
        protocol: &str,
        request: &Message,
    ) -> Result<Option<Message>, EngineError> {
        if !self.modes.replay_mode() {
            return Ok(None);
        }
        self.replayer
            .query(ctx, protocol, request, MatchStrategy::Exact)
    }
}
