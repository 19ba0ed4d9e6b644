//! Whole-file reads and atomic writes of OHLCV bars.

use b3_core::{DataError, OhlcvBar, Result, bars_from_frame, bars_to_frame};
use chrono::SecondsFormat;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::options::{FileFormat, StoreOptions};

fn storage_err(context: &str, path: &Path, e: impl std::fmt::Display) -> DataError {
    DataError::Storage(format!("{context} {}: {e}", path.display()))
}

/// Reads every row of a file.
///
/// Rows with null fields are dropped; a file missing canonical columns is a
/// [`DataError::Schema`] error.
pub(crate) fn read_bars(path: &Path, format: FileFormat) -> Result<Vec<OhlcvBar>> {
    let frame = match format {
        FileFormat::Csv => {
            let overrides = Schema::from_iter([
                (PlSmallStr::from("date"), DataType::String),
                (PlSmallStr::from("symbol"), DataType::String),
            ]);
            CsvReadOptions::default()
                .with_has_header(true)
                .with_schema_overwrite(Some(Arc::new(overrides)))
                .try_into_reader_with_file_path(Some(path.to_path_buf()))
                .and_then(|reader| reader.finish())
                .map_err(|e| storage_err("failed to read", path, e))?
        }
        FileFormat::Parquet => {
            let file = File::open(path).map_err(|e| storage_err("failed to open", path, e))?;
            ParquetReader::new(file)
                .finish()
                .map_err(|e| storage_err("failed to read", path, e))?
        }
    };

    let (bars, dropped) = bars_from_frame(&frame)?;
    if dropped > 0 {
        debug!(path = %path.display(), dropped, "Dropped rows with null fields");
    }
    Ok(bars)
}

/// Reads an existing file, treating a missing or unreadable file as empty.
pub(crate) fn read_existing(path: &Path, format: FileFormat) -> Vec<OhlcvBar> {
    if !path.exists() {
        return Vec::new();
    }
    match read_bars(path, format) {
        Ok(bars) => bars,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Existing file unreadable; treating as empty");
            Vec::new()
        }
    }
}

/// Overwrites `path` with `bars`.
///
/// Writes go to a sibling `.tmp` file that is renamed into place.
pub(crate) fn write_bars(bars: &[OhlcvBar], path: &Path, options: &StoreOptions) -> Result<()> {
    let tmp_path = path.with_extension(format!("{}.tmp", options.format.extension()));

    let written = write_file(bars, &tmp_path, options);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        storage_err("atomic rename failed for", path, e)
    })
}

fn write_file(bars: &[OhlcvBar], path: &Path, options: &StoreOptions) -> Result<()> {
    let mut file = File::create(path).map_err(|e| storage_err("failed to create", path, e))?;

    match options.format {
        FileFormat::Csv => {
            let mut frame = csv_frame(bars)?;
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut frame)
                .map_err(|e| storage_err("failed to write", path, e))?;
        }
        FileFormat::Parquet => {
            let mut frame = bars_to_frame(bars)?;
            ParquetWriter::new(&mut file)
                .with_compression(options.compression.to_parquet())
                .finish(&mut frame)
                .map_err(|e| storage_err("failed to write", path, e))?;
        }
    }
    Ok(())
}

/// Canonical table with `date` rendered as RFC 3339 UTC text.
fn csv_frame(bars: &[OhlcvBar]) -> Result<DataFrame> {
    let mut frame = bars_to_frame(bars)?;
    let dates: Vec<String> = bars
        .iter()
        .map(|b| b.date.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .collect();
    frame
        .with_column(Column::new("date".into(), dates))
        .map_err(|e| DataError::Schema(e.to_string()))?;
    Ok(frame)
}
