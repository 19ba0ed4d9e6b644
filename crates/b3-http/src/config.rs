use b3_core::{DataError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Retry and timeout settings for [`HttpClient`](crate::HttpClient).
///
/// Passed explicitly to every client; there is no process-wide default
/// instance beyond [`HttpConfig::default`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Maximum number of attempts for one logical request.
    pub max_retries: u32,
    /// Backoff before the second attempt.
    pub backoff_base: Duration,
    /// Multiplier applied to the backoff after every failed attempt.
    pub backoff_factor: f64,
    /// Bounds of the uniform jitter added to each backoff.
    pub jitter: (Duration, Duration),
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_factor: 2.0,
            jitter: (Duration::from_millis(100), Duration::from_millis(500)),
        }
    }
}

impl HttpConfig {
    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff base and growth factor.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, factor: f64) -> Self {
        self.backoff_base = base;
        self.backoff_factor = factor;
        self
    }

    /// Sets the jitter bounds.
    #[must_use]
    pub const fn with_jitter(mut self, low: Duration, high: Duration) -> Self {
        self.jitter = (low, high);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks the settings.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidConfiguration`] if the backoff factor is
    /// below 1 or not finite, or if the jitter bounds are inverted.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(DataError::InvalidConfiguration(format!(
                "backoff_factor must be a finite value >= 1, got {}",
                self.backoff_factor
            )));
        }
        let (low, high) = self.jitter;
        if low > high {
            return Err(DataError::InvalidConfiguration(format!(
                "jitter low bound {low:?} exceeds high bound {high:?}"
            )));
        }
        Ok(())
    }

    /// Backoff to sleep after the failed `attempt` (1-based), before jitter.
    pub(crate) fn backoff_for(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        self.backoff_base.as_secs_f64() * self.backoff_factor.powi(exponent)
    }
}
