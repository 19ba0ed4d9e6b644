//! Filesystem-backed [`OhlcvRepository`].

use async_trait::async_trait;
use b3_core::{OhlcvRepository, Result, Symbol};
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::merge;
use crate::options::StoreOptions;

/// Repository storing raw partitions and processed datasets on local disk.
///
/// Raw data lives under `{raw_dir}/{SYMBOL}/{year}.{ext}`, processed data at
/// `{processed_dir}/{SYMBOL}.{ext}`. A single process is assumed to own both
/// directories.
#[derive(Debug, Clone)]
pub struct FileRepository {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    raw_options: StoreOptions,
    processed_options: StoreOptions,
}

impl FileRepository {
    /// Create a repository with CSV raw partitions and Snappy Parquet
    /// processed files.
    pub fn new(raw_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
            raw_options: StoreOptions::csv(),
            processed_options: StoreOptions::parquet(),
        }
    }

    /// Set the format used for raw partitions.
    #[must_use]
    pub const fn with_raw_options(mut self, options: StoreOptions) -> Self {
        self.raw_options = options;
        self
    }

    /// Set the format used for processed datasets.
    #[must_use]
    pub const fn with_processed_options(mut self, options: StoreOptions) -> Self {
        self.processed_options = options;
        self
    }

    /// Root of the raw partitions.
    #[must_use]
    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Root of the processed datasets.
    #[must_use]
    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Options applied to raw writes.
    #[must_use]
    pub const fn raw_options(&self) -> &StoreOptions {
        &self.raw_options
    }

    /// Options applied to processed writes.
    #[must_use]
    pub const fn processed_options(&self) -> &StoreOptions {
        &self.processed_options
    }
}

#[async_trait]
impl OhlcvRepository for FileRepository {
    #[instrument(skip(self, frame), fields(symbol = %symbol))]
    async fn save_raw(&self, symbol: &Symbol, frame: &DataFrame) -> Result<Vec<PathBuf>> {
        merge::save_raw(symbol, frame, &self.raw_dir, &self.raw_options)
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn load_raw(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame> {
        merge::load_raw(symbol, &self.raw_dir, start, end)
    }

    #[instrument(skip(self, frame), fields(symbol = %symbol))]
    async fn save_processed(&self, symbol: &Symbol, frame: &DataFrame) -> Result<PathBuf> {
        merge::save_processed(symbol, frame, &self.processed_dir, &self.processed_options)
    }
}
