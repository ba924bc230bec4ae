//! Archivist Core - extract, recompress, repackage and upload.
//!
//! Archivist takes archives (or plain folders) dropped by a user, opens them
//! with password probing, re-encodes the images inside, packages the result
//! into a new archive and optionally submits it to a remote API.
//!
//! # Architecture
//!
//! ```text
//! Input → Extract (7z) → Prepare → Convert (ffmpeg) → Package (7z) → Upload
//! ```
//!
//! External binaries are located by [`tools::ToolResolver`] and driven through
//! the [`archive::Archiver`] and [`image::Transcoder`] traits.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use archivist_core::{Config, Pipeline, WorkQueue};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> archivist_core::Result<()> {
//!     let config = Arc::new(Config::load()?);
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let queue = WorkQueue::new();
//!     queue.push("./drop/set.7z");
//!     queue.close();
//!
//!     let (tx, _rx) = tokio::sync::mpsc::channel(64);
//!     let summary = pipeline.run(&queue, &tx, &CancellationToken::new()).await;
//!     println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod archive;
pub mod config;
pub mod error;
pub mod image;
pub mod naming;
pub mod pipeline;
pub mod remote;
pub mod tools;
pub mod workspace;

// Re-exports for convenient access
pub use archive::{ArchiveFormat, Archiver, OutputArchive, SevenZip};
pub use config::Config;
pub use error::{ArchivistError, ConfigError, PipelineError, PipelineResult, Result};
pub use image::{Ffmpeg, TargetFormat, Transcoder};
pub use pipeline::{
    ItemReport, ItemStatus, Pipeline, ProgressEvent, RunSummary, Stage, WorkItem, WorkQueue,
};
pub use remote::{SubmissionClient, SubmissionRecord};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
