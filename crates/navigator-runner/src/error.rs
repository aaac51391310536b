//! Launch failures.
//!
//! A [`LaunchError`] never escapes a run started through the orchestrator;
//! it is turned into a diagnostic record and the run ends `Failed`. Direct
//! users of the launcher or image puller receive it as an ordinary error.

use std::path::PathBuf;
use thiserror::Error;

use navigator_core::NavigatorError;

/// Result alias for launch operations.
pub type LaunchResult<T> = std::result::Result<T, LaunchError>;

/// Reasons a child process could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The container engine binary is not on PATH
    #[error("Container engine '{engine}' not found")]
    EngineNotFound { engine: String },

    /// The command binary could not be found (direct execution)
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },

    /// The operating system refused to execute the binary
    #[error("Permission denied executing {command}")]
    PermissionDenied { command: String },

    /// The image is not present and the pull policy forbids pulling it
    #[error("Image '{image}' is not available locally and pull policy is 'never'")]
    ImageUnavailable { image: String },

    /// The engine failed to pull the image
    #[error("Failed to pull image '{image}': {message}")]
    ImagePullFailed { image: String, message: String },

    /// The configured working directory does not exist
    #[error("Working directory does not exist: {path}")]
    WorkingDirectoryMissing { path: PathBuf },

    /// The configuration cannot describe a valid invocation
    #[error("Invalid run configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Any other spawn failure reported by the OS
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Classify an I/O error from `spawn` for the given program.
    pub fn from_spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        let command = command.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::CommandNotFound { command },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { command },
            _ => Self::Spawn { command, source },
        }
    }

    /// Create an invalid configuration error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Actionable hint shown next to the diagnostic.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::EngineNotFound { .. } => {
                Some("Install podman or docker, or run with '--engine none'")
            }
            Self::CommandNotFound { .. } => Some("Check that the command is installed and on PATH"),
            Self::PermissionDenied { .. } => Some("Check the file permissions of the command"),
            Self::ImageUnavailable { .. } => {
                Some("Try again with '--pull-policy missing' or pull the image manually")
            }
            Self::ImagePullFailed { .. } => {
                Some("Check the image name and registry credentials, or use '--pull-policy never'")
            }
            Self::WorkingDirectoryMissing { .. } => Some("Create the directory or pass '--cwd'"),
            Self::InvalidConfiguration { .. } | Self::Spawn { .. } => None,
        }
    }
}

impl From<LaunchError> for NavigatorError {
    fn from(err: LaunchError) -> Self {
        NavigatorError::Launch {
            hint: err.hint(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_classification() {
        let err = LaunchError::from_spawn(
            "ansible-playbook",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, LaunchError::CommandNotFound { .. }));

        let err = LaunchError::from_spawn(
            "./site.sh",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, LaunchError::PermissionDenied { .. }));

        let err = LaunchError::from_spawn("x", std::io::Error::other("boom"));
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[test]
    fn test_conversion_keeps_hint() {
        let err: NavigatorError = LaunchError::EngineNotFound {
            engine: "podman".into(),
        }
        .into();
        assert!(err.to_string().contains("podman"));
        assert!(err.guidance().is_some());
    }
}
