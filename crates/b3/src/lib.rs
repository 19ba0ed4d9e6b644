#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/b3/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! B3 daily OHLCV collection.
//!
//! This crate re-exports the core types, the storage layer and the provider
//! implementations, and provides a [`CompositeProvider`] for primary/secondary
//! fallback plus a [`FetchPipeline`] for multi-symbol runs.
//!
//! # Features
//!
//! - `brapi` - brapi.dev provider
//! - `yahoo` - Yahoo Finance provider

// Core types and traits
pub use b3_core::*;

// HTTP client configuration
pub use b3_http::{HttpClient, HttpConfig};

// Storage
pub use b3_store::{
    Compression, FileFormat, FileRepository, StoreOptions, load_raw, save_processed, save_raw,
};

// Providers
#[cfg(feature = "brapi")]
pub use b3_brapi::BrapiProvider;
#[cfg(feature = "yahoo")]
pub use b3_yahoo::YahooProvider;

mod composite;
pub use composite::CompositeProvider;

/// Multi-symbol fetch runs.
pub mod pipeline;
pub use pipeline::{
    FetchJob, FetchPipeline, ProcessOutcome, RunArgs, RunCounts, RunInfo, RunSummary,
    SymbolOutcome, SymbolStatus, process_symbol,
};
