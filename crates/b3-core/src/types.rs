//! Core data types for B3 market data.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Symbol`] - Trading symbol/ticker
//! - [`OhlcvBar`] - One row of the canonical OHLCV table
//! - [`HttpMeta`] - HTTP diagnostics collected by the retry client
//! - [`FetchMeta`] - Per-call fetch diagnostics reported to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::range::RangeToken;

/// A trading symbol/ticker.
///
/// Symbols are trimmed and uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, trimming whitespace and converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the symbol is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One daily OHLCV (Open, High, Low, Close, Volume) row of the canonical table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// Session timestamp (UTC).
    pub date: DateTime<Utc>,
    /// Ticker the bar belongs to.
    pub symbol: Symbol,
    /// Opening price.
    pub open: f64,
    /// Highest price during the session.
    pub high: f64,
    /// Lowest price during the session.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: i64,
}

impl OhlcvBar {
    /// Creates a new OHLCV bar.
    #[must_use]
    pub const fn new(
        date: DateTime<Utc>,
        symbol: Symbol,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            date,
            symbol,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Returns true if the bar satisfies the canonical row invariants:
    /// non-empty symbol, finite non-negative prices and non-negative volume.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let price_ok = |p: f64| p.is_finite() && p >= 0.0;
        !self.symbol.is_empty()
            && price_ok(self.open)
            && price_ok(self.high)
            && price_ok(self.low)
            && price_ok(self.close)
            && self.volume >= 0
    }
}

/// HTTP diagnostics accumulated by the retry client across one or more requests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpMeta {
    /// Number of HTTP attempts issued.
    pub attempts: u32,
    /// Number of backoff sleeps taken between attempts.
    pub retries: u32,
    /// Total backoff sleep in seconds, rounded to milliseconds.
    pub sleep_total_s: f64,
    /// Last HTTP status observed, if any response was received.
    pub last_status: Option<u16>,
    /// Number of times the throttle hook was invoked.
    pub throttle_calls: u32,
}

impl HttpMeta {
    /// Adds a backoff sleep to the running total, keeping millisecond precision.
    pub fn record_sleep(&mut self, seconds: f64) {
        self.retries += 1;
        self.sleep_total_s = ((self.sleep_total_s + seconds) * 1000.0).round() / 1000.0;
    }
}

/// Diagnostics for one `fetch_daily` call.
///
/// Not persisted; exists only to populate run summaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchMeta {
    /// HTTP counters.
    pub http: HttpMeta,
    /// Name of the provider that served the data.
    pub provider: Option<String>,
    /// Provider-native range token actually used.
    pub range_used: Option<RangeToken>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_symbol_normalization() {
        assert_eq!(Symbol::new("  petr4 ").as_str(), "PETR4");
        assert!(Symbol::new("   ").is_empty());
        assert_eq!("vale3".parse::<Symbol>().unwrap().to_string(), "VALE3");
    }

    #[test]
    fn test_bar_validity() {
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 13, 0, 0).unwrap();
        let bar = OhlcvBar::new(date, Symbol::new("PETR4"), 10.0, 11.0, 9.5, 10.5, 100);
        assert!(bar.is_valid());

        let negative = OhlcvBar {
            low: -1.0,
            ..bar.clone()
        };
        assert!(!negative.is_valid());

        let nan = OhlcvBar {
            open: f64::NAN,
            ..bar.clone()
        };
        assert!(!nan.is_valid());

        let no_volume = OhlcvBar { volume: -1, ..bar };
        assert!(!no_volume.is_valid());
    }

    #[test]
    fn test_record_sleep_rounds_to_millis() {
        let mut meta = HttpMeta::default();
        meta.record_sleep(0.123_456);
        meta.record_sleep(0.000_6);
        assert_eq!(meta.retries, 2);
        assert!((meta.sleep_total_s - 0.124).abs() < 1e-9);
    }
}
