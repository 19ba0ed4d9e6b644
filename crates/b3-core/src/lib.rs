#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/b3/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the B3 daily OHLCV pipeline.
//!
//! This crate provides the foundations shared by every provider and store:
//!
//! - [`DailyPriceProvider`](provider::DailyPriceProvider) - Daily OHLCV fetches
//! - [`OhlcvRepository`](provider::OhlcvRepository) - Raw and processed persistence
//! - [`Throttler`](throttle::Throttler) - Minimum-interval request pacing
//! - [`choose_range`](range::choose_range) - Provider lookback window selection
//! - [`clean_and_validate`](clean::clean_and_validate) - Canonical table invariants

/// Cleaning and validation of canonical tables.
pub mod clean;
/// Error types for data operations.
pub mod error;
/// Canonical table schema and row conversion.
pub mod frame;
/// Provider and repository traits.
pub mod provider;
/// Range tokens and the range selector.
pub mod range;
/// Request pacing and injectable clocks.
pub mod throttle;
/// Core data types (Symbol, OhlcvBar, fetch metadata).
pub mod types;

// Re-export commonly used items at crate root
pub use clean::{clean_and_validate, clean_bars, dedupe_keep_last, sort_by_date, sort_by_symbol_date};
pub use error::{DataError, Result};
pub use frame::{
    OHLCV_COLUMNS, bars_from_frame, bars_to_frame, day_start, empty_frame, parse_timestamp,
    require_columns, retain_days,
};
pub use provider::{DailyPriceProvider, DataProvider, FetchRequest, OhlcvRepository};
pub use range::{RangeToken, choose_range, choose_range_at};
pub use throttle::{Clock, ManualClock, Throttle, Throttler, TokioClock};
pub use types::{FetchMeta, HttpMeta, OhlcvBar, Symbol};
