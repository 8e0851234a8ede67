//! Exercise Catalog Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities used by every member of the exercise catalog workspace:
//!
//! - **Error Handling**: the common error type and result alias
//! - **Checksums**: SHA-256 digests for input files and stable identifiers
//! - **Logging**: centralized `tracing` subscriber configuration
//!
//! # Example
//!
//! ```no_run
//! use catalog_common::checksum::compute_checksum;
//! use catalog_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let checksum = compute_checksum(&mut std::fs::File::open(path)?)?;
//!     tracing::info!(%checksum, "Input fingerprinted");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
