use std::sync::Barrier;
use std::thread;

use fastdev_context::Context;
use fastdev_wire::tokens::encode_command_line;
use fastdev_wire::{Action, Message, Session, SessionId};

use crate::{Engine, EngineError, MatchStrategy, Mode, ModeSwitch, tags};

const ODD_BYTES: &[u8] = b"\x00\xC0\n\t\x00\xBEm\x06\x89Z(\x00\n";

fn engine(record: bool, replay: bool) -> Engine {
    let modes = ModeSwitch::for_tests();
    modes.set_record_mode(record);
    modes.set_replay_mode(replay);
    Engine::new(modes)
}

fn sid(hex: &str) -> SessionId {
    SessionId::parse(hex).unwrap()
}

#[test]
fn record_redis_set_then_inbound_http() {
    let engine = engine(true, false);
    let ctx = Context::attached();
    let id = sid("df3b64266ebe4e63a464e135000a07cd");
    engine.recorder().start_with_id(&ctx, id.clone()).unwrap();

    let set: [&[u8]; 3] = [b"SET", b"a", ODD_BYTES];
    let request = encode_command_line(&set);
    assert_eq!(request, r#"SET a "\x00\xc0\x0a\x09\x00\xbem\x06\x89Z(\x00\x0a""#);
    engine
        .recorder()
        .record_action(&ctx, Action::new(tags::REDIS, request, ODD_BYTES))
        .unwrap();
    engine
        .recorder()
        .record_inbound(
            &ctx,
            Action::new(
                tags::HTTP,
                "GET /cart HTTP/1.1\r\nHost: shop\r\n\r\n",
                "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
            ),
        )
        .unwrap();
    let live = engine.recorder().stop(&ctx).unwrap();

    assert_eq!(live.id, id);
    assert_eq!(live.actions.len(), 1);
    assert_eq!(live.actions[0].label, "SET");
    assert_eq!(live.inbound.as_ref().unwrap().label, "GET /cart");
    assert!(live.has_dense_ids());

    let json = live.to_json().unwrap();
    assert!(json.starts_with(r#"{"session":"df3b64266ebe4e63a464e135000a07cd","#));
    let reparsed = Session::from_json(&json).unwrap();
    assert_eq!(reparsed, live);
    assert_eq!(reparsed.actions[0].response.as_bytes(), Some(ODD_BYTES));
}

#[test]
fn replay_exact_match_consumes_once() {
    let engine = engine(false, true);
    let id = sid("0123456789abcdef0123456789abcdef");
    let mut session = Session::new(id.clone());
    let mut set = Action::new(tags::REDIS, "SET a 1", "OK");
    set.id = 0;
    let mut get = Action::new(tags::REDIS, "GET a", "1");
    get.id = 1;
    session.actions = vec![set, get];
    engine.replayer().store(session).unwrap();

    let ctx = Context::attached();
    engine.replayer().set_session_id(&ctx, id.clone()).unwrap();
    let request = Message::text("GET a");

    let first = engine
        .replayer()
        .query(&ctx, tags::REDIS, &request, MatchStrategy::Exact)
        .unwrap();
    assert_eq!(first, Some(Message::text("1")));
    let second = engine
        .replayer()
        .query(&ctx, tags::REDIS, &request, MatchStrategy::Exact)
        .unwrap();
    assert_eq!(second, None);
    assert_eq!(engine.replayer().unconsumed(&id).unwrap(), vec![0]);
}

#[test]
fn concurrent_appends_get_dense_unique_ids() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let engine = engine(true, false);
    let ctx = Context::attached();
    engine.recorder().start(&ctx).unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let ctx = ctx.clone();
            let engine = &engine;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    engine
                        .recorder()
                        .record_action(&ctx, Action::new(tags::SQL, format!("select {t}, {i}"), "1"))
                        .unwrap();
                }
            });
        }
    });

    let session = engine.recorder().stop(&ctx).unwrap();
    assert_eq!(session.actions.len(), THREADS * PER_THREAD);
    assert!(session.has_dense_ids());
    let ids: Vec<u64> = session.actions.iter().map(|a| a.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn concurrent_identical_queries_succeed_once() {
    const CALLERS: usize = 8;

    let engine = engine(false, true);
    let id = sid("ffffffffffffffffffffffffffffffff");
    let mut session = Session::new(id.clone());
    session.actions.push(Action::new(tags::REDIS, "GET a", "1"));
    engine.replayer().store(session).unwrap();
    let ctx = Context::attached();
    engine.replayer().set_session_id(&ctx, id).unwrap();

    let barrier = Barrier::new(CALLERS);
    let hits: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let ctx = ctx.clone();
                let engine = &engine;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    engine
                        .replayer()
                        .query(&ctx, tags::REDIS, &Message::text("GET a"), MatchStrategy::Exact)
                        .unwrap()
                        .is_some()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum()
    });
    assert_eq!(hits, 1);
}

#[test]
fn record_mode_off_mutates_nothing() {
    let engine = engine(false, false);
    let ctx = Context::attached();

    assert!(matches!(
        engine.recorder().start(&ctx),
        Err(EngineError::ModeDisabled(Mode::Record))
    ));
    assert!(ctx.keys().is_empty());
    assert!(engine.recorder().open_sessions().is_empty());
    assert!(matches!(
        engine
            .recorder()
            .record_action(&ctx, Action::new(tags::SQL, "select 1", "1")),
        Err(EngineError::ModeDisabled(Mode::Record))
    ));
    assert!(matches!(
        engine.recorder().stop(&ctx),
        Err(EngineError::ModeDisabled(Mode::Record))
    ));
}

#[test]
fn storing_a_session_twice_is_refused() {
    let engine = engine(false, true);
    let id = sid("00000000000000000000000000000001");
    engine.replayer().store(Session::new(id.clone())).unwrap();
    assert!(matches!(
        engine.replayer().store(Session::new(id.clone())),
        Err(EngineError::SessionAlreadyExists(existing)) if existing == id
    ));
}

#[test]
fn zero_candidates_is_a_clean_miss() {
    let engine = engine(false, true);
    let id = sid("00000000000000000000000000000002");
    engine.replayer().store(Session::new(id.clone())).unwrap();
    let ctx = Context::attached();
    engine.replayer().set_session_id(&ctx, id).unwrap();
    assert_eq!(
        engine
            .replayer()
            .query(&ctx, tags::SQL, &Message::text("select 1"), MatchStrategy::Best)
            .unwrap(),
        None
    );
}

#[test]
fn maybe_helpers_are_inert_when_modes_are_off() {
    let engine = engine(false, false);
    let ctx = Context::attached();
    assert_eq!(
        engine
            .maybe_record(&ctx, Action::new(tags::SQL, "select 1", "1"))
            .unwrap(),
        None
    );
    assert_eq!(
        engine
            .maybe_replay(&ctx, tags::SQL, &Message::text("select 1"))
            .unwrap(),
        None
    );
}

#[test]
fn recorded_session_replays_through_the_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = crate::SessionDir::new(tmp.path());

    let recording = engine(true, false);
    let ctx = Context::attached();
    let id = recording.recorder().start(&ctx).unwrap();
    recording
        .maybe_record(&ctx, Action::new(tags::SQL, "select name from users", "ada"))
        .unwrap();
    dir.save(&recording.recorder().stop(&ctx).unwrap()).unwrap();

    let replaying = engine(false, true);
    replaying.replayer().store(dir.load(&id).unwrap()).unwrap();
    let ctx = Context::attached();
    replaying.replayer().set_session_id(&ctx, id).unwrap();
    assert_eq!(
        replaying
            .maybe_replay(&ctx, tags::SQL, &Message::text("select name from users"))
            .unwrap(),
        Some(Message::text("ada"))
    );
}
