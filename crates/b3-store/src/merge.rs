//! Merge-on-write persistence of raw partitions and processed datasets.

use b3_core::{
    DataError, OhlcvBar, Result, Symbol, bars_from_frame, bars_to_frame, clean_and_validate,
    dedupe_keep_last, empty_frame, require_columns, retain_days, sort_by_date,
    sort_by_symbol_date,
};
use chrono::{Datelike, NaiveDate};
use polars::prelude::DataFrame;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::io::{read_bars, read_existing, write_bars};
use crate::options::{FileFormat, StoreOptions};

/// Directory holding the raw partitions of a symbol: `{base_dir}/{SYMBOL}`.
#[must_use]
pub fn raw_dir(base_dir: &Path, symbol: &Symbol) -> PathBuf {
    base_dir.join(symbol.as_str())
}

/// Path of one raw partition: `{base_dir}/{SYMBOL}/{year}.{ext}`.
#[must_use]
pub fn partition_path(base_dir: &Path, symbol: &Symbol, year: i32, format: FileFormat) -> PathBuf {
    raw_dir(base_dir, symbol).join(format!("{year}.{}", format.extension()))
}

/// Path of a processed dataset: `{base_dir}/{SYMBOL}.{ext}`.
#[must_use]
pub fn processed_path(base_dir: &Path, symbol: &Symbol, format: FileFormat) -> PathBuf {
    base_dir.join(format!("{}.{}", symbol.as_str(), format.extension()))
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| DataError::Storage(format!("failed to create {}: {e}", dir.display())))
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// Merges `frame` into the yearly raw partitions of `symbol`.
///
/// Rows are grouped by UTC calendar year. Each touched partition is read
/// (an unreadable file counts as empty), extended with the new rows,
/// deduplicated on `(symbol, date)` keeping the newest row, sorted by date
/// and rewritten. Returns the written paths in year order; an empty frame
/// writes nothing.
///
/// # Errors
/// Returns [`DataError::Schema`] if a canonical column is missing and
/// [`DataError::Storage`] if a partition cannot be written.
#[instrument(skip(frame, options), fields(symbol = %symbol, rows = frame.height()))]
pub fn save_raw(
    symbol: &Symbol,
    frame: &DataFrame,
    base_dir: &Path,
    options: &StoreOptions,
) -> Result<Vec<PathBuf>> {
    if frame.height() == 0 {
        info!("No data to persist");
        return Ok(Vec::new());
    }
    require_columns(frame)?;

    let (bars, dropped) = bars_from_frame(frame)?;
    if dropped > 0 {
        warn!(dropped, "Dropped rows with null fields before saving");
    }

    let mut by_year: BTreeMap<i32, Vec<OhlcvBar>> = BTreeMap::new();
    for bar in bars {
        by_year.entry(bar.date.year()).or_default().push(bar);
    }

    create_dir(&raw_dir(base_dir, symbol))?;

    let mut written = Vec::with_capacity(by_year.len());
    for (year, incoming) in by_year {
        let path = partition_path(base_dir, symbol, year, options.format);

        let mut merged = read_existing(&path, options.format);
        let existing = merged.len();
        merged.extend(incoming);
        let mut merged = dedupe_keep_last(merged);
        sort_by_date(&mut merged);

        write_bars(&merged, &path, options)?;
        info!(
            year,
            existing,
            rows = merged.len(),
            path = %path.display(),
            bytes = file_size(&path),
            "Saved raw partition"
        );
        written.push(path);
    }

    Ok(written)
}

/// Loads every raw partition of `symbol`.
///
/// Files are read in name order; files that cannot be read or lack canonical
/// columns are skipped with a warning. The optional bounds are inclusive
/// days. A missing directory yields an empty table.
///
/// # Errors
/// Returns [`DataError::Storage`] if the symbol directory cannot be listed.
#[instrument(fields(symbol = %symbol))]
pub fn load_raw(
    symbol: &Symbol,
    base_dir: &Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DataFrame> {
    let dir = raw_dir(base_dir, symbol);
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No raw directory");
        return Ok(empty_frame());
    }

    let entries = fs::read_dir(&dir)
        .map_err(|e| DataError::Storage(format!("failed to list {}: {e}", dir.display())))?;
    let mut files: Vec<(PathBuf, FileFormat)> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| FileFormat::from_path(&path).map(|format| (path, format)))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut bars = Vec::new();
    for (path, format) in &files {
        match read_bars(path, *format) {
            Ok(rows) => bars.extend(rows),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable raw file"),
        }
    }

    retain_days(&mut bars, start, end);
    sort_by_date(&mut bars);
    debug!(files = files.len(), rows = bars.len(), "Loaded raw partitions");
    bars_to_frame(&bars)
}

/// Cleans `frame` and merges it into the processed dataset of `symbol`.
///
/// The result is sorted by `(symbol, date)` with one row per key, the newest
/// winning. Saving the same table twice leaves identical content.
///
/// # Errors
/// Returns [`DataError::Schema`] if a canonical column is missing and
/// [`DataError::Storage`] if the file cannot be written.
#[instrument(skip(frame, options), fields(symbol = %symbol, rows = frame.height()))]
pub fn save_processed(
    symbol: &Symbol,
    frame: &DataFrame,
    base_dir: &Path,
    options: &StoreOptions,
) -> Result<PathBuf> {
    let cleaned = clean_and_validate(frame)?;
    let (incoming, _) = bars_from_frame(&cleaned)?;

    create_dir(base_dir)?;
    let path = processed_path(base_dir, symbol, options.format);

    let mut merged = read_existing(&path, options.format);
    merged.extend(incoming);
    sort_by_symbol_date(&mut merged);
    let merged = dedupe_keep_last(merged);

    write_bars(&merged, &path, options)?;
    info!(
        rows = merged.len(),
        path = %path.display(),
        bytes = file_size(&path),
        "Saved processed dataset"
    );
    Ok(path)
}
