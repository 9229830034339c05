//! Stepup Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the Stepup tools.
//!
//! # Overview
//!
//! - **Fingerprints**: Content digests used as deduplication keys
//! - **Logging**: Centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```
//! use stepup_common::fingerprint::Fingerprint;
//!
//! let payload = serde_json::json!({"request_id": "a"});
//! let fingerprint = Fingerprint::of(&payload);
//! assert_eq!(fingerprint.as_bytes().len(), 16);
//! ```

pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use fingerprint::Fingerprint;
