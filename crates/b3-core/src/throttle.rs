//! Request pacing.
//!
//! [`Throttler`] enforces a minimum interval between successive operations.
//! Time is read and slept through the [`Clock`] trait so that pacing and
//! retry backoff can be tested deterministically with [`ManualClock`].

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::error::{DataError, Result};

/// Source of monotonic time and of sleeping.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Creates a clock whose origin is the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual clock: sleeping returns immediately and advances virtual time.
///
/// Every requested sleep is recorded and can be inspected with
/// [`ManualClock::sleeps`].
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// Creates a clock at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = state.now.saturating_add(duration);
    }

    /// Returns every sleep requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sleeps.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sleeps.push(duration);
        state.now = state.now.saturating_add(duration);
    }
}

/// Hook invoked before every outbound request.
#[async_trait]
pub trait Throttle: Send + Sync + Debug {
    /// Waits until the next operation is allowed to start.
    async fn wait(&self);
}

/// Enforces a minimum interval between successive [`Throttle::wait`] calls.
///
/// The first call never blocks. The cursor is not meant to be shared by
/// concurrent callers; it assumes one sequential user.
#[derive(Debug)]
pub struct Throttler {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    next_allowed: Mutex<Option<Duration>>,
}

impl Throttler {
    /// Creates a throttler driven by the tokio clock.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidConfiguration`] if `min_interval_s` is
    /// negative or not finite.
    pub fn new(min_interval_s: f64) -> Result<Self> {
        Self::with_clock(min_interval_s, Arc::new(TokioClock::new()))
    }

    /// Creates a throttler driven by the given clock.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidConfiguration`] if `min_interval_s` is
    /// negative or not finite.
    pub fn with_clock(min_interval_s: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !min_interval_s.is_finite() || min_interval_s < 0.0 {
            return Err(DataError::InvalidConfiguration(format!(
                "min_interval_s must be >= 0, got {min_interval_s}"
            )));
        }
        let min_interval = Duration::try_from_secs_f64(min_interval_s).map_err(|e| {
            DataError::InvalidConfiguration(format!(
                "min_interval_s out of range ({min_interval_s}): {e}"
            ))
        })?;
        Ok(Self::from_duration(min_interval, clock))
    }

    /// Creates a throttler from an already validated interval.
    #[must_use]
    pub fn from_duration(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            next_allowed: Mutex::new(None),
        }
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[async_trait]
impl Throttle for Throttler {
    async fn wait(&self) {
        let now = self.clock.now();
        let delay = {
            let mut next = self
                .next_allowed
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let next_allowed = next.unwrap_or(now);
            *next = Some(now.max(next_allowed).saturating_add(self.min_interval));
            next_allowed.saturating_sub(now)
        };

        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Throttling request");
            self.clock.sleep(delay).await;
        }
    }
}
