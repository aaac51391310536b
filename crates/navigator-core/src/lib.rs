//! # navigator-core
//!
//! Core types, errors, and utilities shared by the navigator crates.
//!
//! This crate provides:
//! - [`NavigatorError`] - Error type for configuration, artifact, launch and terminal failures
//! - [`logging`] - Tracing setup and log management utilities
//! - [`types`] - Run status, engine and pull policy definitions
//! - [`events`] - The [`EventRecord`] model produced by the stream decoder
//!
//! ## Example
//!
//! ```no_run
//! use navigator_core::{NavigatorError, logging};
//!
//! fn main() -> navigator_core::Result<()> {
//!     let _guard = logging::init_logging(None, false, false)?;
//!
//!     let artifact = std::path::Path::new("site-artifact.json");
//!     if !artifact.exists() {
//!         return Err(NavigatorError::artifact_not_found(artifact));
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

// Re-export main types for convenience
pub use error::{NavigatorError, Result};
pub use events::{EventPayload, EventRecord, LineOrigin, Sequence, TaskOutcome};
pub use logging::{LogGuard, init_logging};
pub use types::{EngineKind, PullPolicy, RunId, RunStatus, Timestamp};
