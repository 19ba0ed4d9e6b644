use b3_core::{Clock, DataError, HttpMeta, Result, Throttle, TokioClock};
use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::HttpConfig;

/// Descriptive user agent sent by default.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "b3-data/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/factordynamics/b3)"
);

/// JSON client with bounded retries, exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpConfig,
    clock: Arc<dyn Clock>,
    provider: String,
}

impl HttpClient {
    /// Creates a client with the default user agent.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidConfiguration`] if `config` is invalid or
    /// the underlying HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self> {
        Self::with_user_agent(config, DEFAULT_USER_AGENT)
    }

    /// Creates a client that sends `user_agent` on every request.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidConfiguration`] if `config` is invalid or
    /// the underlying HTTP client cannot be built.
    pub fn with_user_agent(config: HttpConfig, user_agent: &str) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| DataError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            client,
            config,
            clock: Arc::new(TokioClock::new()),
            provider: "http".to_string(),
        })
    }

    /// Uses `clock` for backoff sleeps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the provider name reported in rate-limit and server errors.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Returns the retry configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Fetches `url` and parses the body as JSON.
    ///
    /// `throttle` is awaited before every attempt. When `meta` is supplied,
    /// attempts, retries, cumulative backoff, throttle calls and the last
    /// HTTP status are recorded in it.
    ///
    /// # Errors
    /// - [`DataError::Parse`] on a 200 response whose body is not JSON (not retried)
    /// - [`DataError::Http`] on any non-200 status other than 429 or 5xx (not retried)
    /// - [`DataError::InvalidArgument`] if the request cannot be built
    /// - the last [`DataError::Network`], [`DataError::RateLimited`] or
    ///   [`DataError::Server`] once the attempt budget is exhausted
    #[instrument(skip(self, throttle, meta), fields(provider = %self.provider))]
    pub async fn get_json(
        &self,
        url: &str,
        throttle: Option<&dyn Throttle>,
        mut meta: Option<&mut HttpMeta>,
    ) -> Result<Value> {
        let max_retries = self.config.max_retries;
        let mut last_error: Option<DataError> = None;

        for attempt in 1..=max_retries {
            if let Some(throttle) = throttle {
                throttle.wait().await;
                if let Some(meta) = meta.as_deref_mut() {
                    meta.throttle_calls += 1;
                }
            }
            if let Some(meta) = meta.as_deref_mut() {
                meta.attempts += 1;
            }

            debug!(attempt, max_retries, "Sending request");
            match self.send_once(url, meta.as_deref_mut()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(attempt, url, error = %e, "Transient failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < max_retries {
                let delay = self.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                self.clock.sleep(delay).await;
                if let Some(meta) = meta.as_deref_mut() {
                    meta.record_sleep(delay.as_secs_f64());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DataError::Network("unspecified network error".to_string())))
    }

    /// Issues one GET and classifies the outcome.
    async fn send_once(&self, url: &str, meta: Option<&mut HttpMeta>) -> Result<Value> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                DataError::InvalidArgument(format!("invalid request for {url}: {e}"))
            } else {
                DataError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if let Some(meta) = meta {
            meta.last_status = Some(status.as_u16());
        }

        if status == StatusCode::OK {
            let body = response
                .bytes()
                .await
                .map_err(|e| DataError::Network(e.to_string()))?;
            serde_json::from_slice(&body)
                .map_err(|e| DataError::Parse(format!("invalid JSON from {url}: {e}")))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(DataError::RateLimited {
                provider: self.provider.clone(),
                retry_after: parse_retry_after(response.headers()),
            })
        } else if status.is_server_error() {
            Err(DataError::Server {
                provider: self.provider.clone(),
                status: status.as_u16(),
            })
        } else {
            Err(DataError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let seconds = self.config.backoff_for(attempt) + sample_jitter(self.config.jitter);
        Duration::try_from_secs_f64(seconds).unwrap_or(self.config.backoff_base)
    }
}

fn sample_jitter((low, high): (Duration, Duration)) -> f64 {
    let (low, high) = (low.as_secs_f64(), high.as_secs_f64());
    if high <= low {
        low
    } else {
        rand::rng().random_range(low..=high)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
