//! Process-wide record/replay switches.
//!
//! Both flags start from the environment. They can only be flipped at runtime
//! inside a test harness; anywhere else a toggle is a bug and panics. The two
//! modes are independent flags: enabling one does not disable the other, and
//! adapters must not both record and replay the same action.

use std::path::Path;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{EngineError, Mode};

pub const RECORD_ENV: &str = "GS_FASTDEV_RECORD";
pub const REPLAY_ENV: &str = "GS_FASTDEV_REPLAY";

const TEST_RUNNER_ARGS: &[&str] = &["--test-threads", "--nocapture", "--exact", "--include-ignored"];

#[derive(Debug)]
pub struct ModeSwitch {
    record: AtomicBool,
    replay: AtomicBool,
    toggles_unlocked: bool,
}

impl ModeSwitch {
    /// Toggles are unlocked only when the process is a test harness.
    pub fn new(record: bool, replay: bool) -> Self {
        Self {
            record: AtomicBool::new(record),
            replay: AtomicBool::new(replay),
            toggles_unlocked: running_under_test_harness(),
        }
    }

    pub fn init_from_env() -> Self {
        Self::new(env_flag(RECORD_ENV), env_flag(REPLAY_ENV))
    }

    /// Both modes off, toggles unlocked.
    #[cfg(any(test, feature = "testing"))]
    pub fn for_tests() -> Self {
        Self {
            record: AtomicBool::new(false),
            replay: AtomicBool::new(false),
            toggles_unlocked: true,
        }
    }

    pub fn record_mode(&self) -> bool {
        self.record.load(Ordering::Acquire)
    }

    pub fn replay_mode(&self) -> bool {
        self.replay.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self, mode: Mode) -> bool {
        match mode {
            Mode::Record => self.record_mode(),
            Mode::Replay => self.replay_mode(),
        }
    }

    pub fn ensure(&self, mode: Mode) -> Result<(), EngineError> {
        if self.is_enabled(mode) {
            Ok(())
        } else {
            Err(EngineError::ModeDisabled(mode))
        }
    }

    pub fn toggles_unlocked(&self) -> bool {
        self.toggles_unlocked
    }

    /// # Panics
    ///
    /// Outside a test harness.
    pub fn set_record_mode(&self, on: bool) {
        self.assert_unlocked(Mode::Record);
        self.record.store(on, Ordering::Release);
    }

    /// # Panics
    ///
    /// Outside a test harness.
    pub fn set_replay_mode(&self, on: bool) {
        self.assert_unlocked(Mode::Replay);
        self.replay.store(on, Ordering::Release);
    }

    fn assert_unlocked(&self, mode: Mode) {
        assert!(
            self.toggles_unlocked,
            "{mode} mode can only be toggled from tests"
        );
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| is_truthy(&value))
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Whether this process looks like a test harness: a test-runner flag on the
/// command line, or an executable under cargo's `deps/` output directory.
pub fn running_under_test_harness() -> bool {
    static DETECTED: OnceLock<bool> = OnceLock::new();
    *DETECTED.get_or_init(|| {
        let flagged = std::env::args().skip(1).any(|arg| {
            TEST_RUNNER_ARGS.iter().any(|flag| {
                arg == *flag
                    || arg
                        .strip_prefix(flag)
                        .is_some_and(|rest| rest.starts_with('='))
            })
        });
        flagged
            || std::env::current_exe().is_ok_and(|exe| {
                exe.parent()
                    .and_then(Path::file_name)
                    .is_some_and(|dir| dir == "deps")
            })
    })
}
