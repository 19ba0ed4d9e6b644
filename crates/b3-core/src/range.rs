//! Provider lookback range tokens and the range selector.
//!
//! Range-based providers anchor their `range` parameter at the current date,
//! not at the requested start. The selector therefore measures how far back
//! from today a window reaches, not just how wide it is.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;

/// Provider-native lookback window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RangeToken {
    /// One month (31 days).
    #[serde(rename = "1mo")]
    OneMonth,
    /// Three months (93 days).
    #[serde(rename = "3mo")]
    ThreeMonths,
    /// Six months (186 days).
    #[serde(rename = "6mo")]
    SixMonths,
    /// One year (366 days).
    #[serde(rename = "1y")]
    OneYear,
    /// Five years (5 × 366 days).
    #[serde(rename = "5y")]
    FiveYears,
    /// Full history.
    #[serde(rename = "max")]
    Max,
}

impl RangeToken {
    /// Bounded tokens in ascending order of coverage.
    pub const BOUNDED: [Self; 5] = [
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
        Self::FiveYears,
    ];

    /// Returns the query-string value for this token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::FiveYears => "5y",
            Self::Max => "max",
        }
    }

    /// Nominal coverage in days, or `None` for [`RangeToken::Max`].
    #[must_use]
    pub const fn nominal_days(&self) -> Option<i64> {
        match self {
            Self::OneMonth => Some(31),
            Self::ThreeMonths => Some(93),
            Self::SixMonths => Some(186),
            Self::OneYear => Some(366),
            Self::FiveYears => Some(5 * 366),
            Self::Max => None,
        }
    }
}

impl fmt::Display for RangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeToken {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1mo" => Ok(Self::OneMonth),
            "3mo" => Ok(Self::ThreeMonths),
            "6mo" => Ok(Self::SixMonths),
            "1y" => Ok(Self::OneYear),
            "5y" => Ok(Self::FiveYears),
            "max" => Ok(Self::Max),
            other => Err(DataError::InvalidArgument(format!(
                "unknown range token: {other}"
            ))),
        }
    }
}

/// Chooses the smallest token covering `[start, end]` as seen from today (UTC).
#[must_use]
pub fn choose_range(start: NaiveDate, end: NaiveDate) -> RangeToken {
    choose_range_at(start, end, Utc::now().date_naive())
}

/// Chooses the smallest token covering `[start, end]` as seen from `today`.
///
/// Coverage is the inclusive span of the window plus the distance from `end`
/// back to `today` (zero when `end` is in the future).
#[must_use]
pub fn choose_range_at(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> RangeToken {
    let span_days = (end - start).num_days() + 1;
    let dist_to_now = (today - end).num_days().max(0);
    let coverage = span_days + dist_to_now;

    RangeToken::BOUNDED
        .into_iter()
        .find(|token| token.nominal_days().is_some_and(|days| coverage <= days))
        .unwrap_or(RangeToken::Max)
}
