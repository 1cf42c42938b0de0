//! Wall and monotonic time sources.
//!
//! Timestamps written to logs come from [`Clock::now`]; sliding-window rate
//! decisions use [`Clock::monotonic`] so they are immune to wall-clock jumps.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current monotonic instant.
    fn monotonic(&self) -> Instant;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Both the wall and monotonic readings advance together through
/// [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    wall_origin: DateTime<Utc>,
    mono_origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Start at `wall_origin`.
    pub fn new(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            mono_origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Start at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move both readings forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }

    fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.wall_origin + elapsed
    }

    fn monotonic(&self) -> Instant {
        self.mono_origin + self.elapsed()
    }
}
