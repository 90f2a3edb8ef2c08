// Bounded Retry With Backoff
//
// Polls a step function until it reports a value or the attempt
// ceiling is reached. Delays between attempts come from a caller
// supplied function, so the same loop serves linear, constant or
// exponential curves.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The step produced a value.
    Ready(T),

    /// Every attempt ran without producing a value.
    TimedOut { attempts: u32 },
}

/// Linear backoff: the n-th wait is `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Retry ceiling. Zero behaves like one.
    pub max_attempts: u32,

    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `step` under this policy.
    pub fn poll<T, E, F>(&self, sleeper: &dyn Sleeper, step: F) -> Result<PollOutcome<T>, E>
    where
        F: FnMut(u32) -> Result<Option<T>, E>,
    {
        poll_with_backoff(self.max_attempts, |n| self.delay_for(n), sleeper, step)
    }
}

/// Call `step` with attempt numbers `1..=max_attempts` until it yields a value.
///
/// After each attempt that yields nothing (except the last) the sleeper
/// waits `delay(attempt)`. Errors from `step` abort the loop immediately.
pub fn poll_with_backoff<T, E, D, F>(
    max_attempts: u32,
    delay: D,
    sleeper: &dyn Sleeper,
    mut step: F,
) -> Result<PollOutcome<T>, E>
where
    D: Fn(u32) -> Duration,
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if let Some(value) = step(attempt)? {
            return Ok(PollOutcome::Ready(value));
        }
        if attempt < max_attempts {
            sleeper.sleep(delay(attempt));
        }
    }

    Ok(PollOutcome::TimedOut {
        attempts: max_attempts,
    })
}

/// Something that can wait.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Returns immediately and remembers every requested delay.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
