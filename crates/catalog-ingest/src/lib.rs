//! Exercise Catalog Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Idempotent batch loading of an exercise catalog into a document store.
//!
//! # Pipeline
//!
//! - **Normalize**: loosely-typed source entries become canonical records
//!   with a stable id ([`normalize`])
//! - **Resolve**: each record is inserted, merged or skipped according to the
//!   identity policy ([`resolve`])
//! - **Commit**: writes go out in atomic chunks of at most 500 ([`commit`])
//! - **Report**: outcome tally plus a verification count ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use catalog_ingest::{store, IngestConfig, IngestionPipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     config.validate()?;
//!
//!     let store = store::connect(&config)?;
//!     let summary = IngestionPipeline::new(store, config)
//!         .run_path("./data/exercises.json", None, &CancellationToken::new())
//!         .await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod commit;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod source;
pub mod store;

pub use config::{IdStrategy, IdentityPolicy, IngestConfig, StoreKind};
pub use error::{IngestError, Result, StoreError};
pub use pipeline::{IngestionPipeline, RunPhase};
pub use report::{OutcomeTally, RunOutcome, RunSummary};
pub use store::DocumentStore;
