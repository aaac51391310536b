//! Error types for navigator operations.
//!
//! [`NavigatorError`] covers the failures that propagate out of the core:
//! configuration problems, artifact I/O, launch failures and terminal setup.
//! Anomalies inside a run (malformed lines, orphan results) are never errors;
//! they are recorded as data in the run itself.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`NavigatorError`].
pub type Result<T> = std::result::Result<T, NavigatorError>;

/// Error type for all navigator operations.
#[derive(Debug, Error)]
pub enum NavigatorError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Settings file not found
    #[error("Settings file not found at {path}")]
    SettingsNotFound { path: PathBuf },

    /// Settings file is invalid YAML
    #[error("Invalid settings at {path}: {message}")]
    SettingsInvalid { path: PathBuf, message: String },

    /// A single settings value could not be interpreted
    #[error("Invalid value for {field}: {message}")]
    SettingsValue { field: String, message: String },

    /// No command was given for a run
    #[error("No command specified")]
    MissingCommand,

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error with context
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Parsing Errors
    // =========================================================================
    /// JSON parsing error
    #[error("JSON parse error in {context}: {message}")]
    JsonParse {
        context: String,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // =========================================================================
    // Artifact Errors
    // =========================================================================
    /// Replay artifact not found
    #[error("Playbook artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    /// Replay artifact could not be understood
    #[error("Invalid playbook artifact {path}: {message}")]
    ArtifactInvalid { path: PathBuf, message: String },

    // =========================================================================
    // Launch Errors
    // =========================================================================
    /// The run could not be started
    #[error("Launch failed: {message}")]
    Launch {
        message: String,
        hint: Option<&'static str>,
    },

    // =========================================================================
    // TUI Errors
    // =========================================================================
    /// Terminal initialization failed
    #[error("Terminal initialization failed: {message}")]
    TerminalInit { message: String },

    /// Terminal restore failed
    #[error("Failed to restore terminal: {message}")]
    TerminalRestore { message: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (bug in navigator)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NavigatorError {
    /// Create an I/O error
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a JSON parse error
    pub fn json_parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::JsonParse {
            context: context.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a settings value error
    pub fn settings_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SettingsValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an ArtifactNotFound error
    pub fn artifact_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ArtifactNotFound { path: path.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Error classification helpers
    // =========================================================================

    /// Returns true if this error is fatal (should exit application)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TerminalInit { .. } | Self::Internal { .. })
    }

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::SettingsNotFound { .. }
                | Self::SettingsInvalid { .. }
                | Self::SettingsValue { .. }
                | Self::MissingCommand
        )
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::SettingsInvalid { .. } => Some("Check YAML syntax in the settings file"),
            Self::SettingsValue { .. } => {
                Some("Volume mounts use 'src:dest[:label]' and environment variables use 'NAME=value'")
            }
            Self::MissingCommand => Some("Pass the command to run after '--'"),
            Self::ArtifactNotFound { .. } => {
                Some("Try again with 'replay <valid path to playbook artifact>'")
            }
            Self::Launch { hint, .. } => *hint,
            Self::TerminalInit { .. } => Some("Try again with '--mode stdout'"),
            _ => None,
        }
    }
}
