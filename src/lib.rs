//! # arkive Core Library
//!
//! Streaming backup and restore of directory trees into a single archive
//! file. A backup walks the source tree and pushes every entry through an
//! ordered stack of stream layers:
//!
//! ```text
//! archive file  <-  [AES-256-GCM frame]  <-  zstd frame  <-  entry stream
//! ```
//!
//! A restore unwinds the same stack in reverse. Nothing is held in memory
//! beyond fixed-size buffers, so archive size is bounded only by disk space.
//!
//! ## Key Modules
//!
//! - [`walk`]: depth-first traversal of the source tree.
//! - [`archive`]: the entry stream codec (headers, payloads, end marker).
//! - [`compress`]: the zstd layer.
//! - [`crypto`]: the optional passphrase-based encryption layer.
//! - [`pipeline`]: the [`pipeline::Stage`] trait and the ordered stage stack.
//! - [`backup`] / [`extract`]: the two pipelines.
//! - [`hashcheck`]: duplicate-content detection.
//!
//! ## Examples
//!
//! ```no_run
//! use arkive::backup::{backup, BackupOptions};
//! use arkive::extract::{restore, RestoreOptions};
//!
//! # fn main() -> arkive::error::Result<()> {
//! backup(&BackupOptions::new("photos", "photos.ark").passphrase("correct horse"))?;
//! restore(&RestoreOptions::new("photos.ark", "restored").passphrase("correct horse"))?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compress;
pub mod crypto;
pub mod error;
pub use error::ArchiverError;
pub mod extract;

// Cross-platform filesystem wrapper
pub mod fsx;

pub mod hashcheck;
pub mod pipeline;
pub mod walk;
