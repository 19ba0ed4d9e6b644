//! Cleaning and validation of canonical OHLCV tables.

use polars::prelude::DataFrame;
use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::frame::{bars_from_frame, bars_to_frame, empty_frame};
use crate::types::OhlcvBar;

/// Enforces the canonical table invariants on any input table.
///
/// A zero-row input short-circuits to an empty, correctly typed table
/// without checking columns. Otherwise the seven canonical columns must be
/// present; values are coerced, rows with nulls or negative/non-finite values
/// are dropped, and the result is sorted by `(symbol, date)` with duplicates
/// resolved in favour of the last occurrence.
///
/// # Errors
/// Returns [`DataError::Schema`](crate::DataError::Schema) if a required
/// column is missing.
pub fn clean_and_validate(frame: &DataFrame) -> Result<DataFrame> {
    if frame.height() == 0 {
        return Ok(empty_frame());
    }

    let (bars, null_rows) = bars_from_frame(frame)?;
    let before = bars.len();
    let cleaned = clean_bars(bars);
    debug!(
        input = frame.height(),
        null_rows,
        output = cleaned.len(),
        removed = before - cleaned.len(),
        "Cleaned OHLCV table"
    );

    bars_to_frame(&cleaned)
}

/// Drops invalid bars, sorts by `(symbol, date)` and dedupes keeping the last.
#[must_use]
pub fn clean_bars(mut bars: Vec<OhlcvBar>) -> Vec<OhlcvBar> {
    bars.retain(OhlcvBar::is_valid);
    sort_by_symbol_date(&mut bars);
    dedupe_keep_last(bars)
}

/// Stable sort ascending by date.
pub fn sort_by_date(bars: &mut [OhlcvBar]) {
    bars.sort_by_key(|bar| bar.date);
}

/// Stable sort ascending by `(symbol, date)`.
pub fn sort_by_symbol_date(bars: &mut [OhlcvBar]) {
    bars.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));
}

/// Removes duplicate `(symbol, date)` keys, keeping the last occurrence in
/// input order. Surviving rows keep their relative order.
#[must_use]
pub fn dedupe_keep_last(bars: Vec<OhlcvBar>) -> Vec<OhlcvBar> {
    let keep: Vec<bool> = {
        let mut last = HashMap::with_capacity(bars.len());
        for (idx, bar) in bars.iter().enumerate() {
            last.insert((&bar.symbol, bar.date), idx);
        }
        bars.iter()
            .enumerate()
            .map(|(idx, bar)| last.get(&(&bar.symbol, bar.date)) == Some(&idx))
            .collect()
    };

    bars.into_iter()
        .zip(keep)
        .filter_map(|(bar, keep)| keep.then_some(bar))
        .collect()
}
