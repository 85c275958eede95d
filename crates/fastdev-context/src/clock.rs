//! Request-scoped fake time.
//!
//! A replaying request can pin "now" to a fixed instant, or shift the real
//! clock so that elapsed time is preserved from a recorded base. Recording
//! always reads the real clock so captured timestamps stay truthful.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::{Carrier, CarrierError, keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeTime {
    /// `now()` is always this instant.
    Fixed(SystemTime),
    /// `now()` is `base` plus the real time elapsed since `from`.
    Based { base: SystemTime, from: Instant },
}

impl FakeTime {
    pub fn based(base: SystemTime) -> Self {
        Self::Based {
            base,
            from: Instant::now(),
        }
    }

    pub fn now(&self) -> SystemTime {
        match self {
            Self::Fixed(at) => *at,
            Self::Based { base, from } => base.checked_add(from.elapsed()).unwrap_or(*base),
        }
    }
}

pub fn set_fixed(ctx: &impl Carrier, at: SystemTime) -> Result<(), CarrierError> {
    ctx.store(keys::FAKE_TIME, FakeTime::Fixed(at))
}

pub fn set_based(ctx: &impl Carrier, base: SystemTime) -> Result<(), CarrierError> {
    ctx.store(keys::FAKE_TIME, FakeTime::based(base))
}

/// Removes any provider, returning whether one was attached.
pub fn reset(ctx: &impl Carrier) -> Result<bool, CarrierError> {
    ctx.delete(keys::FAKE_TIME)
}

pub fn provider(ctx: &impl Carrier) -> Result<Option<FakeTime>, CarrierError> {
    ctx.load::<FakeTime>(keys::FAKE_TIME)
}

/// The current time as seen by the request behind `ctx`.
pub fn now(ctx: &impl Carrier, record_mode: bool) -> SystemTime {
    if record_mode {
        return SystemTime::now();
    }
    match provider(ctx) {
        Ok(Some(fake)) => fake.now(),
        Ok(None) => SystemTime::now(),
        Err(err) => {
            warn!(%err, "ignoring malformed fake time provider");
            SystemTime::now()
        }
    }
}

/// Nanoseconds since the unix epoch, negative before it, saturating at the
/// `i64` range.
pub fn unix_nanos(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

pub fn from_unix_nanos(nanos: i64) -> SystemTime {
    let magnitude = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    fn second(n: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(n)
    }

    #[test]
    fn fixed_time_is_exact() {
        let ctx = Context::attached();
        set_fixed(&ctx, second(100)).unwrap();
        assert_eq!(now(&ctx, false), second(100));
        assert_eq!(unix_nanos(now(&ctx, false)), 100_000_000_000);
    }

    #[test]
    fn based_time_preserves_elapsed() {
        let ctx = Context::attached();
        set_based(&ctx, second(100)).unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let observed = now(&ctx, false);
        let drift = observed
            .duration_since(second(100))
            .expect("based time never runs backwards");
        assert!(drift >= Duration::from_millis(300));
        assert!(drift < Duration::from_millis(500), "drift was {drift:?}");
    }

    #[test]
    fn record_mode_ignores_provider() {
        let ctx = Context::attached();
        set_fixed(&ctx, second(100)).unwrap();
        assert!(now(&ctx, true) > second(1_000_000));
    }

    #[test]
    fn based_time_saturates_at_the_latest_instant() {
        let Some(base) = UNIX_EPOCH.checked_add(Duration::new(i64::MAX as u64, 999_999_999)) else {
            return;
        };
        let fake = FakeTime::Based {
            base,
            from: Instant::now() - Duration::from_millis(5),
        };
        assert_eq!(fake.now(), base);
    }

    #[test]
    fn reset_restores_real_clock() {
        let ctx = Context::attached();
        set_fixed(&ctx, second(5)).unwrap();
        assert!(reset(&ctx).unwrap());
        assert!(!reset(&ctx).unwrap());
        assert!(now(&ctx, false) > second(1_000_000));
    }

    #[test]
    fn unix_nanos_round_trips_both_sides_of_epoch() {
        for nanos in [0i64, 1, -1, 1_700_000_000_123_456_789, -42_000_000_000] {
            assert_eq!(unix_nanos(from_unix_nanos(nanos)), nanos);
        }
    }
}
