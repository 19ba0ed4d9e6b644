#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/b3/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! On-disk storage for B3 daily OHLCV tables.
//!
//! - [`save_raw`] - Merge rows into yearly raw partitions
//! - [`load_raw`] - Read raw partitions back with an optional day window
//! - [`save_processed`] - Clean and merge into one processed dataset
//! - [`FileRepository`] - [`OhlcvRepository`](b3_core::OhlcvRepository) over the functions above

mod io;
/// Merge-on-write persistence functions.
pub mod merge;
/// File format and compression options.
pub mod options;
/// Filesystem repository.
pub mod repository;

pub use merge::{load_raw, partition_path, processed_path, raw_dir, save_processed, save_raw};
pub use options::{Compression, FileFormat, StoreOptions};
pub use repository::FileRepository;
