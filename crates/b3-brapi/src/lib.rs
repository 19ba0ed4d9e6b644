#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/b3/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Payload normalization into the canonical table.
pub mod normalize;
mod provider;

pub use normalize::{normalize, normalize_bars};
pub use provider::{BRAPI_BASE_URL, BrapiProvider};
