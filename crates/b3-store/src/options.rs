//! Storage format options.

use b3_core::DataError;
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// On-disk file format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Comma-separated values with a header row.
    #[default]
    Csv,
    /// Apache Parquet.
    Parquet,
}

impl FileFormat {
    /// File extension without the dot.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }

    /// Detects the format from a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "csv" => Some(Self::Csv),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            other => Err(DataError::InvalidArgument(format!(
                "unknown file format: {other}"
            ))),
        }
    }
}

/// Parquet compression codec. Ignored for CSV.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    #[default]
    None,
    /// Snappy.
    Snappy,
    /// Zstandard at the default level.
    Zstd,
    /// Gzip at the default level.
    Gzip,
    /// Brotli at the default level.
    Brotli,
}

impl Compression {
    pub(crate) const fn to_parquet(self) -> ParquetCompression {
        match self {
            Self::None => ParquetCompression::Uncompressed,
            Self::Snappy => ParquetCompression::Snappy,
            Self::Zstd => ParquetCompression::Zstd(None),
            Self::Gzip => ParquetCompression::Gzip(None),
            Self::Brotli => ParquetCompression::Brotli(None),
        }
    }
}

impl FromStr for Compression {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            "gzip" => Ok(Self::Gzip),
            "brotli" => Ok(Self::Brotli),
            other => Err(DataError::InvalidArgument(format!(
                "unknown compression: {other}"
            ))),
        }
    }
}

/// Format and compression used when writing files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// File format of written files.
    pub format: FileFormat,
    /// Parquet compression codec.
    pub compression: Compression,
}

impl StoreOptions {
    /// Creates options for the given format and codec.
    #[must_use]
    pub const fn new(format: FileFormat, compression: Compression) -> Self {
        Self {
            format,
            compression,
        }
    }

    /// CSV, the default for raw partitions.
    #[must_use]
    pub const fn csv() -> Self {
        Self::new(FileFormat::Csv, Compression::None)
    }

    /// Snappy-compressed Parquet, the default for processed datasets.
    #[must_use]
    pub const fn parquet() -> Self {
        Self::new(FileFormat::Parquet, Compression::Snappy)
    }
}
