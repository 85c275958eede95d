//! Per-session action accumulator.
//!
//! A session is `open` from [`Recorder::start`] until [`Recorder::stop`]
//! hands the snapshot to the caller; after that every append fails with
//! [`EngineError::SessionClosed`]. Each session has its own mutex, held only
//! while an id is assigned and the action appended.

use std::collections::HashMap;
use std::sync::Arc;

use fastdev_context::keys::RECORD_SESSION_ID;
use fastdev_context::{Carrier, clock};
use fastdev_wire::{Action, Session, SessionId};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::protocol::ProtocolRegistry;
use crate::{EngineError, Mode, ModeSwitch};

struct OpenSession {
    session: Session,
    next_id: u64,
    closed: bool,
}

impl OpenSession {
    fn new(id: SessionId) -> Self {
        Self {
            session: Session::new(id),
            next_id: 0,
            closed: false,
        }
    }
}

pub struct Recorder {
    modes: Arc<ModeSwitch>,
    registry: Arc<ProtocolRegistry>,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<OpenSession>>>>,
}

impl Recorder {
    pub fn new(modes: Arc<ModeSwitch>, registry: Arc<ProtocolRegistry>) -> Self {
        Self {
            modes,
            registry,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a session under a fresh id and binds it to `ctx`.
    pub fn start(&self, ctx: &impl Carrier) -> Result<SessionId, EngineError> {
        self.start_with_id(ctx, SessionId::generate())
    }

    pub fn start_with_id(
        &self,
        ctx: &impl Carrier,
        id: SessionId,
    ) -> Result<SessionId, EngineError> {
        self.modes.ensure(Mode::Record)?;

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(EngineError::SessionAlreadyExists(id));
        }
        let bound = ctx.load_or_store(RECORD_SESSION_ID, id.clone())?;
        if bound != id {
            return Err(EngineError::SessionAlreadyExists(bound));
        }
        sessions.insert(id.clone(), Arc::new(Mutex::new(OpenSession::new(id.clone()))));
        drop(sessions);

        debug!(session = %id, "recording started");
        Ok(id)
    }

    /// The recording session bound to `ctx`.
    pub fn session_id(&self, ctx: &impl Carrier) -> Result<SessionId, EngineError> {
        ctx.load::<SessionId>(RECORD_SESSION_ID)?
            .ok_or(EngineError::SessionIdMissing(Mode::Record))
    }

    /// Appends an outbound action and returns the id it was assigned.
    pub fn record_action(&self, ctx: &impl Carrier, action: Action) -> Result<u64, EngineError> {
        self.append(ctx, action, |open, action| {
            open.session.actions.push(action);
            Ok(())
        })
    }

    /// Sets the session's inbound action. A session has at most one.
    pub fn record_inbound(&self, ctx: &impl Carrier, action: Action) -> Result<u64, EngineError> {
        self.append(ctx, action, |open, action| {
            if open.session.inbound.is_some() {
                return Err(EngineError::InboundAlreadyRecorded(open.session.id.clone()));
            }
            open.session.inbound = Some(action);
            Ok(())
        })
    }

    fn append(
        &self,
        ctx: &impl Carrier,
        mut action: Action,
        place: impl FnOnce(&mut OpenSession, Action) -> Result<(), EngineError>,
    ) -> Result<u64, EngineError> {
        self.modes.ensure(Mode::Record)?;
        let id = self.session_id(ctx)?;
        let bucket = self
            .sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::SessionClosed(id.clone()))?;

        if action.label.is_empty() {
            action.label = self.registry.label_for(&action.protocol, &action.request);
        }

        let mut open = bucket.lock();
        if open.closed {
            return Err(EngineError::SessionClosed(id));
        }
        // Stamped under the lock so timestamps ascend with ids.
        if action.timestamp == 0 {
            action.timestamp = clock::unix_nanos(clock::now(ctx, self.modes.record_mode()));
        }
        let action_id = open.next_id;
        action.id = action_id;
        place(&mut open, action)?;
        open.next_id += 1;
        Ok(action_id)
    }

    /// Closes the session bound to `ctx` and returns its snapshot.
    pub fn stop(&self, ctx: &impl Carrier) -> Result<Session, EngineError> {
        self.modes.ensure(Mode::Record)?;
        let id = self.session_id(ctx)?;
        let bucket = self
            .sessions
            .write()
            .remove(&id)
            .ok_or_else(|| EngineError::SessionClosed(id.clone()))?;

        let session = {
            let mut open = bucket.lock();
            open.closed = true;
            std::mem::replace(&mut open.session, Session::new(id.clone()))
        };

        if let Err(err) = ctx.delete(RECORD_SESSION_ID) {
            warn!(session = %id, %err, "could not unbind recording session from context");
        }
        info!(session = %id, actions = session.len(), "recording stopped");
        Ok(session)
    }

    pub fn is_recording(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn open_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use fastdev_context::{Context, FrozenContext};
    use fastdev_wire::Message;

    use super::*;

    fn recorder() -> Recorder {
        let modes = ModeSwitch::for_tests();
        modes.set_record_mode(true);
        Recorder::new(Arc::new(modes), Arc::new(ProtocolRegistry::with_builtins()))
    }

    #[test]
    fn ids_count_up_across_inbound_and_actions() {
        let recorder = recorder();
        let ctx = Context::attached();
        recorder.start(&ctx).unwrap();

        assert_eq!(
            recorder
                .record_action(&ctx, Action::new("SQL", "select 1", "1"))
                .unwrap(),
            0
        );
        assert_eq!(
            recorder
                .record_inbound(&ctx, Action::new("HTTP", "GET / HTTP/1.1", "HTTP/1.1 200 OK"))
                .unwrap(),
            1
        );
        assert_eq!(
            recorder
                .record_action(&ctx, Action::new("REDIS", "get a", "1"))
                .unwrap(),
            2
        );

        let session = recorder.stop(&ctx).unwrap();
        assert!(session.has_dense_ids());
        assert_eq!(session.actions[0].label, "SELECT");
        assert_eq!(session.actions[1].label, "GET");
        assert_eq!(session.inbound.as_ref().unwrap().label, "GET /");
        assert!(session.actions.iter().all(|a| a.timestamp > 0));
    }

    #[test]
    fn adapter_labels_and_timestamps_are_kept() {
        let recorder = recorder();
        let ctx = Context::attached();
        recorder.start(&ctx).unwrap();
        let mut action = Action::new("REDIS", "get a", "1").with_label("custom");
        action.timestamp = 42;
        recorder.record_action(&ctx, action).unwrap();

        let session = recorder.stop(&ctx).unwrap();
        assert_eq!(session.actions[0].label, "custom");
        assert_eq!(session.actions[0].timestamp, 42);
    }

    #[test]
    fn timestamps_follow_id_order_across_threads() {
        let recorder = recorder();
        let ctx = Context::attached();
        recorder.start(&ctx).unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let (recorder, ctx) = (&recorder, &ctx);
                s.spawn(move || {
                    for i in 0..50 {
                        recorder
                            .record_action(ctx, Action::new("REDIS", format!("get {t}:{i}"), "1"))
                            .unwrap();
                    }
                });
            }
        });

        let session = recorder.stop(&ctx).unwrap();
        let mut actions = session.actions.clone();
        actions.sort_by_key(|a| a.id);
        assert_eq!(actions.len(), 200);
        assert!(
            actions
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
        );
    }

    #[test]
    fn second_inbound_is_refused_without_burning_an_id() {
        let recorder = recorder();
        let ctx = Context::attached();
        recorder.start(&ctx).unwrap();
        recorder
            .record_inbound(&ctx, Action::new("HTTP", "GET /a", "ok"))
            .unwrap();
        assert!(matches!(
            recorder.record_inbound(&ctx, Action::new("HTTP", "GET /b", "ok")),
            Err(EngineError::InboundAlreadyRecorded(_))
        ));
        assert_eq!(
            recorder
                .record_action(&ctx, Action::new("SQL", "select 1", "1"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn context_with_a_session_cannot_start_another() {
        let recorder = recorder();
        let ctx = Context::attached();
        let first = recorder.start(&ctx).unwrap();
        match recorder.start(&ctx) {
            Err(EngineError::SessionAlreadyExists(id)) => assert_eq!(id, first),
            other => panic!("expected SessionAlreadyExists, got {other:?}"),
        }
        assert_eq!(recorder.open_sessions(), vec![first]);
    }

    #[test]
    fn duplicate_explicit_id_is_refused() {
        let recorder = recorder();
        let id = SessionId::generate();
        recorder.start_with_id(&Context::attached(), id.clone()).unwrap();
        assert!(matches!(
            recorder.start_with_id(&Context::attached(), id),
            Err(EngineError::SessionAlreadyExists(_))
        ));
    }

    #[test]
    fn appends_after_stop_fail_as_not_started() {
        let recorder = recorder();
        let ctx = Context::attached();
        let id = recorder.start(&ctx).unwrap();
        let frozen: FrozenContext = ctx.freeze();
        recorder.stop(&ctx).unwrap();

        assert!(!recorder.is_recording(&id));
        assert!(matches!(
            recorder.record_action(&frozen, Action::new("SQL", "select 1", "1")),
            Err(EngineError::SessionClosed(closed)) if closed == id
        ));
        assert!(matches!(
            recorder.record_action(&ctx, Action::new("SQL", "select 1", "1")),
            Err(EngineError::SessionIdMissing(Mode::Record))
        ));
    }

    #[test]
    fn stop_unbinds_so_the_context_can_record_again() {
        let recorder = recorder();
        let ctx = Context::attached();
        let first = recorder.start(&ctx).unwrap();
        recorder.stop(&ctx).unwrap();
        let second = recorder.start(&ctx).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn unbound_context_is_reported() {
        let recorder = recorder();
        assert!(matches!(
            recorder.record_action(&Context::attached(), Action::new("SQL", "x", "y")),
            Err(EngineError::SessionIdMissing(Mode::Record))
        ));
        assert!(matches!(
            recorder.start(&Context::background()),
            Err(EngineError::Carrier(_))
        ));
    }

    #[test]
    fn recording_timestamps_ignore_fake_time() {
        let recorder = recorder();
        let ctx = Context::attached();
        clock::set_fixed(&ctx, clock::from_unix_nanos(100_000_000_000)).unwrap();
        recorder.start(&ctx).unwrap();
        recorder
            .record_action(&ctx, Action::new("REDIS", "get a", Message::Int(1)))
            .unwrap();
        let session = recorder.stop(&ctx).unwrap();
        assert!(session.actions[0].timestamp > 100_000_000_000);
    }
}
