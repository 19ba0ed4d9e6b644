#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/b3/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Yahoo Finance data provider.
//!
//! This crate provides a Yahoo Finance provider that implements the
//! [`DataProvider`] and [`DailyPriceProvider`] traits from `b3-core`.
//!
//! # Features
//!
//! - Fetch daily OHLCV data using Yahoo Finance's chart API
//! - B3 symbol mapping (`PETR4` → `PETR4.SA`)
//! - Built-in rate limiting (1 request per second by default) when the
//!   caller supplies no throttle of its own
//!
//! # Example
//!
//! ```no_run
//! use b3_yahoo::YahooProvider;
//! use b3_core::{DailyPriceProvider, FetchMeta, FetchRequest};
//! use chrono::NaiveDate;
//!
//! # async fn example() -> b3_core::Result<()> {
//! let provider = YahooProvider::new()?;
//! let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
//!
//! let mut meta = FetchMeta::default();
//! let df = provider
//!     .fetch_daily(&FetchRequest::new("VALE3", start, end), &mut meta)
//!     .await?;
//! println!("Fetched {} rows", df.height());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use b3_core::{
    DailyPriceProvider, DataError, DataProvider, FetchMeta, FetchRequest, OhlcvBar, Result,
    Symbol, Throttle, Throttler, TokioClock, bars_to_frame, day_start, dedupe_keep_last,
    empty_frame, retain_days, sort_by_date,
};
use b3_http::{HttpClient, HttpConfig};
use chrono::DateTime;
use polars::prelude::DataFrame;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// Yahoo Finance API host.
pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Default rate limit delay in milliseconds.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// User agent for HTTP requests.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Market suffix of B3 listings on Yahoo.
const B3_SUFFIX: &str = ".SA";

/// Maps a B3 ticker to Yahoo's symbol convention.
///
/// `.SA` is appended unless the ticker already ends with it (any case) or
/// carries another market suffix.
#[must_use]
pub fn to_yahoo_symbol(symbol: &Symbol) -> String {
    let s = symbol.as_str().trim();
    if s.to_ascii_uppercase().ends_with(B3_SUFFIX) || s.contains('.') {
        s.to_string()
    } else {
        format!("{s}{B3_SUFFIX}")
    }
}

/// Yahoo Finance data provider.
///
/// Implements [`DataProvider`] and [`DailyPriceProvider`].
#[derive(Debug, Clone)]
pub struct YahooProvider {
    http: HttpClient,
    base_url: String,
    rate_limit: Option<Arc<Throttler>>,
}

impl YahooProvider {
    /// Create a new Yahoo Finance provider with default settings.
    ///
    /// Uses built-in rate limiting of 1 request per second.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = HttpClient::with_user_agent(HttpConfig::default(), USER_AGENT)?;
        Ok(Self::with_client(http).with_rate_limit(Duration::from_millis(DEFAULT_RATE_LIMIT_MS)))
    }

    /// Create a new Yahoo Finance provider with a custom HTTP client.
    ///
    /// No built-in rate limiting is applied; callers pace requests through
    /// the request's throttle hook.
    #[must_use]
    pub fn with_client(http: HttpClient) -> Self {
        Self {
            http: http.with_provider("yahoo"),
            base_url: YAHOO_BASE_URL.to_string(),
            rate_limit: None,
        }
    }

    /// Apply a minimum interval between requests that carry no throttle hook.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = Some(Arc::new(Throttler::from_duration(
            rate_limit,
            Arc::new(TokioClock::new()),
        )));
        self
    }

    /// Point the provider at another host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the chart API URL for a request.
    ///
    /// `period2` is the midnight after `end`, since Yahoo treats it as exclusive.
    #[must_use]
    pub fn build_chart_url(&self, request: &FetchRequest) -> String {
        let period1 = day_start(request.start).timestamp();
        let period2 = day_start(request.end + chrono::Duration::days(1)).timestamp();

        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.base_url,
            to_yahoo_symbol(&request.symbol),
            period1,
            period2
        )
    }

    /// Parse Yahoo Finance chart response into bars.
    ///
    /// Missing series yield an empty vector; rows with any missing value are
    /// dropped.
    fn parse_chart_response(symbol: &Symbol, response: ChartResponse) -> Result<Vec<OhlcvBar>> {
        if let Some(error) = response.chart.error {
            return Err(DataError::Parse(format!(
                "{}: {}",
                error.code, error.description
            )));
        }

        let Some(series) = ChartSeries::from_response(response.chart) else {
            warn!(%symbol, "Yahoo response is missing expected columns");
            return Ok(Vec::new());
        };

        let mut bars = Vec::with_capacity(series.timestamps.len());
        let mut incomplete = 0usize;
        for (i, &ts) in series.timestamps.iter().enumerate() {
            let row = (
                DateTime::from_timestamp(ts, 0),
                value_at(&series.quote.open, i),
                value_at(&series.quote.high, i),
                value_at(&series.quote.low, i),
                value_at(&series.quote.close, i),
                value_at(&series.quote.volume, i),
            );
            match row {
                (Some(date), Some(o), Some(h), Some(l), Some(c), Some(v)) => {
                    bars.push(OhlcvBar::new(date, symbol.clone(), o, h, l, c, v as i64));
                }
                _ => incomplete += 1,
            }
        }

        if incomplete > 0 {
            debug!(%symbol, incomplete, "Dropped rows with missing values");
        }

        bars.retain(OhlcvBar::is_valid);
        sort_by_date(&mut bars);
        Ok(dedupe_keep_last(bars))
    }
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn description(&self) -> &str {
        "Yahoo Finance chart API (B3 listings via the .SA suffix)"
    }
}

#[async_trait]
impl DailyPriceProvider for YahooProvider {
    #[instrument(skip(self, request, meta), fields(symbol = %request.symbol, start = %request.start, end = %request.end))]
    async fn fetch_daily(
        &self,
        request: &FetchRequest,
        meta: &mut FetchMeta,
    ) -> Result<DataFrame> {
        request.validate()?;

        let url = self.build_chart_url(request);
        debug!(%url, "Fetching chart");

        let throttle = request
            .throttle_hook()
            .or_else(|| self.rate_limit.as_deref().map(|t| t as &dyn Throttle));
        let payload = self
            .http
            .get_json(&url, throttle, Some(&mut meta.http))
            .await?;

        let response: ChartResponse = serde_json::from_value(payload)
            .map_err(|e| DataError::Parse(format!("unexpected chart payload: {e}")))?;

        let mut bars = Self::parse_chart_response(&request.symbol, response)?;
        if bars.is_empty() {
            return Ok(empty_frame());
        }
        retain_days(&mut bars, Some(request.start), Some(request.end));
        bars_to_frame(&bars)
    }
}

// ============================================================================
// Yahoo Finance API Response Types
// ============================================================================

/// Chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<f64>>>,
}

/// Columns of the first chart result, present only when all are available.
struct ChartSeries {
    timestamps: Vec<i64>,
    quote: Columns,
}

struct Columns {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

impl ChartSeries {
    fn from_response(chart: ChartResult) -> Option<Self> {
        let data = chart.result?.into_iter().next()?;
        let timestamps = data.timestamp?;
        let quote = data.indicators?.quote.into_iter().next()?;
        Some(Self {
            timestamps,
            quote: Columns {
                open: quote.open?,
                high: quote.high?,
                low: quote.low?,
                close: quote.close?,
                volume: quote.volume?,
            },
        })
    }
}
