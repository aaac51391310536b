//! Shared type definitions used across navigator crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::NavigatorError;

/// Unique identifier for one run.
pub type RunId = String;

/// Timestamp type used throughout navigator.
pub type Timestamp = DateTime<Utc>;

/// Get the current UTC timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Lifecycle status of a run.
///
/// `Running` is the only non-terminal value. Once a run reaches a terminal
/// status it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The child process is still being supervised
    #[default]
    Running,
    /// The child exited with code 0
    Completed,
    /// The child exited non-zero, was killed by a signal, or never launched
    Failed,
    /// The operator canceled the run
    Canceled,
    /// The configured timeout elapsed while the child was alive
    TimedOut,
}

impl RunStatus {
    /// Returns true for every status except `Running`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Process exit code used by stdout mode to mirror this status.
    pub fn exit_code(&self, child_code: Option<i32>) -> i32 {
        match self {
            Self::Running => 1,
            Self::Completed => 0,
            Self::Failed => match child_code {
                Some(code) if code != 0 => code,
                _ => 1,
            },
            Self::TimedOut => 124,
            Self::Canceled => 130,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// How the command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Run the command directly on the host
    #[default]
    None,
    /// Run inside a podman container
    Podman,
    /// Run inside a docker container
    Docker,
}

impl EngineKind {
    /// Name of the engine binary, if any.
    pub fn binary(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Podman => Some("podman"),
            Self::Docker => Some("docker"),
        }
    }

    /// Returns true if the command runs inside a container.
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary().unwrap_or("none"))
    }
}

impl FromStr for EngineKind {
    type Err = NavigatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "podman" => Ok(Self::Podman),
            "docker" => Ok(Self::Docker),
            other => Err(NavigatorError::settings_value(
                "container_engine",
                format!("unknown engine '{other}', expected podman, docker or none"),
            )),
        }
    }
}

/// When the execution environment image is pulled before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Pull before every run
    Always,
    /// Pull only if the image is not present locally
    #[default]
    Missing,
    /// Never pull; fail if the image is not present
    Never,
    /// Pull if the tag is `latest` or the image is not present
    Tag,
}

impl std::fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Missing => write!(f, "missing"),
            Self::Never => write!(f, "never"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

impl FromStr for PullPolicy {
    type Err = NavigatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "missing" => Ok(Self::Missing),
            "never" => Ok(Self::Never),
            "tag" => Ok(Self::Tag),
            other => Err(NavigatorError::settings_value(
                "pull_policy",
                format!("unknown pull policy '{other}'"),
            )),
        }
    }
}
