//! Reserved carrier keys.

/// Id of the session being recorded for this request.
pub const RECORD_SESSION_ID: &str = "::RECORD-SESSION-ID::";

/// Id of the stored session this request replays against.
pub const REPLAY_SESSION_ID: &str = "REPLAY-SESSION-ID";

/// Request-scoped [`FakeTime`](crate::clock::FakeTime) provider.
pub const FAKE_TIME: &str = "fake-time";

pub const I18N_LANGUAGE: &str = "i18n-language";

pub const RESERVED: &[&str] = &[RECORD_SESSION_ID, REPLAY_SESSION_ID, FAKE_TIME, I18N_LANGUAGE];

pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}
