//! Provider and repository traits.
//!
//! This module defines the ports of the pipeline:
//!
//! - [`DataProvider`] - Base trait for all data providers
//! - [`DailyPriceProvider`] - Daily OHLCV fetches for a date window
//! - [`OhlcvRepository`] - Persistence of raw partitions and processed datasets

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    error::{DataError, Result},
    throttle::Throttle,
    types::{FetchMeta, Symbol},
};

/// Base trait for all data providers.
pub trait DataProvider: Send + Sync + Debug {
    /// Returns the name of this provider (e.g., "brapi").
    fn name(&self) -> &str;

    /// Returns a description of this provider.
    fn description(&self) -> &str;
}

/// One daily fetch: a symbol and an inclusive date window.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Ticker to fetch.
    pub symbol: Symbol,
    /// First day of the window (inclusive).
    pub start: NaiveDate,
    /// Last day of the window (inclusive).
    pub end: NaiveDate,
    /// Skip the range selector and ask for the full history.
    pub prefer_max: bool,
    /// Hook awaited before every outbound request.
    pub throttle: Option<Arc<dyn Throttle>>,
}

impl FetchRequest {
    /// Creates a request with no throttle and `prefer_max` off.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            prefer_max: false,
            throttle: None,
        }
    }

    /// Sets whether the full history should be requested.
    #[must_use]
    pub fn prefer_max(mut self, prefer_max: bool) -> Self {
        self.prefer_max = prefer_max;
        self
    }

    /// Attaches a throttle hook.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Checks that the symbol is non-blank and `end >= start`.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidArgument`] otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(DataError::InvalidArgument(
                "symbol must be non-empty".to_string(),
            ));
        }
        if self.end < self.start {
            return Err(DataError::InvalidArgument(format!(
                "end ({}) must be >= start ({})",
                self.end, self.start
            )));
        }
        Ok(())
    }

    /// Returns the throttle hook as a trait object reference.
    #[must_use]
    pub fn throttle_hook(&self) -> Option<&dyn Throttle> {
        self.throttle.as_deref()
    }
}

/// Provider for daily OHLCV bars.
#[async_trait]
pub trait DailyPriceProvider: DataProvider {
    /// Fetches the canonical table for the request window.
    ///
    /// Diagnostics (HTTP counters, range used, serving provider) are written
    /// to `meta`. The returned table is canonical and may be empty.
    async fn fetch_daily(&self, request: &FetchRequest, meta: &mut FetchMeta)
    -> Result<DataFrame>;
}

/// Storage for raw year partitions and processed per-symbol datasets.
#[async_trait]
pub trait OhlcvRepository: Send + Sync + Debug {
    /// Merges `frame` into the raw partitions of `symbol`.
    ///
    /// Returns one path per year touched; an empty frame writes nothing.
    async fn save_raw(&self, symbol: &Symbol, frame: &DataFrame) -> Result<Vec<PathBuf>>;

    /// Loads every raw partition of `symbol`, optionally restricted to an
    /// inclusive day window.
    async fn load_raw(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame>;

    /// Cleans `frame` and merges it into the processed dataset of `symbol`.
    async fn save_processed(&self, symbol: &Symbol, frame: &DataFrame) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_request_validation() {
        assert!(FetchRequest::new("PETR4", day(1), day(1)).validate().is_ok());
        assert!(matches!(
            FetchRequest::new("  ", day(1), day(2)).validate(),
            Err(DataError::InvalidArgument(_))
        ));
        assert!(matches!(
            FetchRequest::new("PETR4", day(3), day(2)).validate(),
            Err(DataError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_request_builder() {
        let req = FetchRequest::new("petr4", day(1), day(2)).prefer_max(true);
        assert_eq!(req.symbol.as_str(), "PETR4");
        assert!(req.prefer_max);
        assert!(req.throttle_hook().is_none());
    }
}
