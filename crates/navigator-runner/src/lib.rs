//! Run supervision for navigator.
//!
//! This crate starts automation commands, either directly on the host or
//! inside an execution environment container, and turns their output into a
//! shared, append-only [`RunResult`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Settings + CLI      │
//! │  (RunConfiguration)  │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │    Orchestrator      │─────▶│   ProcessLauncher    │
//! │  (supervising task)  │      │ (image pull, spawn)  │
//! └──────────┬───────────┘      └──────────┬───────────┘
//!            │                             │ bounded channels
//!            ▼                             ▼
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │      RunResult       │◀─────│    EventDecoder      │
//! │   (append-only)      │      │ (lines → records)    │
//! └──────────────────────┘      └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use navigator_runner::{Orchestrator, RunConfiguration};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RunConfiguration::new("ansible-playbook")
//!         .with_args(["-i", "inventory", "site.yml"])
//!         .with_timeout(Duration::from_secs(600));
//!
//!     let mut handle = Orchestrator::new().start(config);
//!     let result = handle.await_completion(None).await;
//!
//!     println!("{} records, {}", result.len(), result.status());
//! }
//! ```

pub mod artifact;
pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod puller;
pub mod result;
pub mod settings;

// Re-export main types for convenience
pub use config::{MountAccess, MountLabel, RunConfiguration, VolumeMount};
pub use decoder::EventDecoder;
pub use error::{LaunchError, LaunchResult};
pub use launcher::{
    ExitStatus, OutputChunk, ProcessHandle, ProcessLauncher, ProcessOutput, SignalKind, StreamKind,
};
pub use orchestrator::{Orchestrator, RunHandle, RunPoll};
pub use puller::{CliImageEngine, ImageEngine, ImagePuller, PullAssessment};
pub use result::RunResult;
pub use settings::{Mode, Settings, SettingsOverrides};
