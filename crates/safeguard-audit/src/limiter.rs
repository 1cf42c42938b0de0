//! Per-action sliding-window rate limiter.
//!
//! Each action keeps a short ring buffer of monotonic instants. One call to
//! [`SlidingWindowLimiter::observe`] records the instant, prunes everything
//! older than the window and reports two independent signals: whether the
//! window now holds a burst, and whether the call came too soon after the
//! previous one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use safeguard_core::AuditConfig;

use crate::error::{AuditError, Result};

/// What the limiter saw for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Invocations of the action currently inside the window, this one
    /// included. Saturates at `threshold + 1`, or 2 when that is smaller.
    pub count: usize,
    /// More than `threshold` invocations fall inside the window.
    pub burst: bool,
    /// The previous invocation was less than the minimum spacing ago.
    pub rate_limited: bool,
}

/// Keyed map of ring buffers behind a mutex.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    min_spacing: Duration,
    threshold: usize,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, min_spacing: Duration, threshold: usize) -> Self {
        Self {
            window,
            min_spacing,
            threshold,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(
            config.alert_window(),
            config.min_spacing(),
            config.alert_threshold,
        )
    }

    /// Record an invocation of `action` at `now` and evaluate it.
    ///
    /// Read, prune, evaluate and append all happen under one lock.
    pub fn observe(&self, action: &str, now: Instant) -> Result<Observation> {
        let mut history = self.lock()?;
        let stamps = history.entry(action.to_string()).or_default();

        stamps.push_back(now);
        while let Some(&oldest) = stamps.front() {
            if now.saturating_duration_since(oldest) > self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        // Only the burst check looks further back than the previous stamp,
        // and the spacing check always needs that one.
        let keep = (self.threshold + 1).max(2);
        while stamps.len() > keep {
            stamps.pop_front();
        }

        let count = stamps.len();
        let rate_limited = count >= 2
            && now.saturating_duration_since(stamps[count - 2]) < self.min_spacing;

        Ok(Observation {
            count,
            burst: count > self.threshold,
            rate_limited,
        })
    }

    /// Forget all recorded invocations.
    pub fn reset(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Number of actions with recorded history.
    pub fn tracked_actions(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VecDeque<Instant>>>> {
        self.history
            .lock()
            .map_err(|e| AuditError::LockPoisoned(format!("limiter: {e}")))
    }
}
