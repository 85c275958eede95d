//! Answers outbound calls from stored sessions.
//!
//! Stored sessions are immutable once published. The only shared mutable
//! state is one consumed flag per action, flipped with a compare-and-set, so
//! each recorded action satisfies at most one query over the session's
//! lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fastdev_context::Carrier;
use fastdev_context::keys::REPLAY_SESSION_ID;
use fastdev_wire::{Action, FieldDiff, Message, Session, SessionId, diff};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::protocol::ProtocolRegistry;
use crate::{EngineError, Mode, ModeSwitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// The recorded request must equal the live one.
    #[default]
    Exact,
    /// The first candidate the replayer's [`RequestMatcher`] accepts.
    Best,
}

/// Comparator used by [`MatchStrategy::Best`].
pub trait RequestMatcher: Send + Sync {
    fn matches(&self, protocol: &str, recorded: &Message, live: &Message) -> bool;
}

/// Byte-for-byte equality.
pub struct ExactMatcher;

impl RequestMatcher for ExactMatcher {
    fn matches(&self, _protocol: &str, recorded: &Message, live: &Message) -> bool {
        recorded == live
    }
}

impl<F> RequestMatcher for F
where
    F: Fn(&str, &Message, &Message) -> bool + Send + Sync,
{
    fn matches(&self, protocol: &str, recorded: &Message, live: &Message) -> bool {
        self(protocol, recorded, live)
    }
}

struct StoredSession {
    session: Session,
    /// protocol -> label -> positions in `session.actions`, in recorded order.
    index: HashMap<String, HashMap<String, Vec<usize>>>,
    consumed: Vec<AtomicBool>,
}

impl StoredSession {
    fn new(session: Session, registry: &ProtocolRegistry) -> Self {
        let mut index: HashMap<String, HashMap<String, Vec<usize>>> = HashMap::new();
        for (position, action) in session.actions.iter().enumerate() {
            // Keyed the same way `query` keys the live request; the stored
            // label is only for display.
            let label = registry.label_for(&action.protocol, &action.request);
            index
                .entry(action.protocol.clone())
                .or_default()
                .entry(label)
                .or_default()
                .push(position);
        }
        let consumed = session
            .actions
            .iter()
            .map(|_| AtomicBool::new(false))
            .collect();
        Self {
            session,
            index,
            consumed,
        }
    }

    fn candidates(&self, protocol: &str, label: &str) -> &[usize] {
        self.index
            .get(protocol)
            .and_then(|labels| labels.get(label))
            .map_or(&[], Vec::as_slice)
    }

    fn try_consume(&self, position: usize) -> bool {
        self.consumed[position]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct Replayer {
    modes: Arc<ModeSwitch>,
    registry: Arc<ProtocolRegistry>,
    matcher: Box<dyn RequestMatcher>,
    sessions: RwLock<HashMap<SessionId, Arc<StoredSession>>>,
}

impl Replayer {
    pub fn new(modes: Arc<ModeSwitch>, registry: Arc<ProtocolRegistry>) -> Self {
        Self::with_matcher(modes, registry, ExactMatcher)
    }

    pub fn with_matcher(
        modes: Arc<ModeSwitch>,
        registry: Arc<ProtocolRegistry>,
        matcher: impl RequestMatcher + 'static,
    ) -> Self {
        Self {
            modes,
            registry,
            matcher: Box::new(matcher),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Indexes and publishes `session`.
    pub fn store(&self, session: Session) -> Result<(), EngineError> {
        let id = session.id.clone();
        let stored = Arc::new(StoredSession::new(session, &self.registry));
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(EngineError::SessionAlreadyExists(id));
        }
        let actions = stored.session.actions.len();
        sessions.insert(id.clone(), stored);
        drop(sessions);

        info!(session = %id, actions, "replay session stored");
        Ok(())
    }

    pub fn delete(&self, id: &SessionId) -> Result<(), EngineError> {
        self.sessions
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.clone()))?;
        info!(session = %id, "replay session deleted");
        Ok(())
    }

    pub fn is_stored(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn stored_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Binds `id` to `ctx` so later queries on it replay that session.
    pub fn set_session_id(&self, ctx: &impl Carrier, id: SessionId) -> Result<(), EngineError> {
        ctx.store(REPLAY_SESSION_ID, id)?;
        Ok(())
    }

    pub fn session_id(&self, ctx: &impl Carrier) -> Result<SessionId, EngineError> {
        ctx.load::<SessionId>(REPLAY_SESSION_ID)?
            .ok_or(EngineError::SessionIdMissing(Mode::Replay))
    }

    /// The recorded response for `request`, consuming the action that
    /// produced it. `Ok(None)` when no unconsumed action matches.
    pub fn query(
        &self,
        ctx: &impl Carrier,
        protocol: &str,
        request: &Message,
        strategy: MatchStrategy,
    ) -> Result<Option<Message>, EngineError> {
        self.modes.ensure(Mode::Replay)?;
        let id = self.session_id(ctx)?;
        let stored = self.lookup(&id)?;
        let label = self.registry.require(protocol)?.label(request);

        for &position in stored.candidates(protocol, &label) {
            let action = &stored.session.actions[position];
            let accepted = match strategy {
                MatchStrategy::Exact => action.request == *request,
                MatchStrategy::Best => self.matcher.matches(protocol, &action.request, request),
            };
            if accepted && stored.try_consume(position) {
                debug!(session = %id, protocol, %label, action = action.id, "replayed");
                return Ok(Some(action.response.clone()));
            }
        }

        debug!(session = %id, protocol, %label, "no recorded action left");
        Ok(None)
    }

    pub fn inbound(&self, id: &SessionId) -> Result<Option<Action>, EngineError> {
        Ok(self.lookup(id)?.session.inbound.clone())
    }

    /// Ids of stored actions no query has consumed yet.
    pub fn unconsumed(&self, id: &SessionId) -> Result<Vec<u64>, EngineError> {
        let stored = self.lookup(id)?;
        Ok(stored
            .session
            .actions
            .iter()
            .zip(&stored.consumed)
            .filter(|(_, consumed)| !consumed.load(Ordering::Acquire))
            .map(|(action, _)| action.id)
            .collect())
    }

    /// Field differences between the recorded inbound response and `actual`.
    /// Empty when the inbound protocol does not diff or cannot flatten.
    pub fn verify_inbound(
        &self,
        id: &SessionId,
        actual: &Message,
    ) -> Result<Vec<FieldDiff>, EngineError> {
        let Some(inbound) = self.inbound(id)? else {
            return Ok(Vec::new());
        };
        let protocol = self.registry.require(&inbound.protocol)?;
        if !protocol.should_diff() {
            return Ok(Vec::new());
        }
        match (
            protocol.flat_response(&inbound.response),
            protocol.flat_response(actual),
        ) {
            (Some(expected), Some(actual)) => Ok(diff(&expected, &actual)),
            _ => Ok(Vec::new()),
        }
    }

    fn lookup(&self, id: &SessionId) -> Result<Arc<StoredSession>, EngineError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(id.clone()))
    }
}
