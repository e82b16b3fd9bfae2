//! Error types for Flotilla

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using FlotillaError
pub type Result<T> = std::result::Result<T, FlotillaError>;

/// Main error type for Flotilla operations
#[derive(Debug, Error)]
pub enum FlotillaError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Errors raised while a plugin performs its work
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Persisted cache errors
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An abstract operation was invoked without being overridden
    #[error("Internal error: '{operation}' was called but is not implemented")]
    Internal { operation: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// A task plugin names a handler that does not exist
    #[error("Plugin '{plugin}' references unknown handler '{handler}'")]
    UnresolvedHandler { plugin: String, handler: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by plugins while they run
#[derive(Debug, Error)]
pub enum PluginError {
    /// The task handler returned an error
    #[error("Task '{plugin}' failed: {message}")]
    HandlerFailed { plugin: String, message: String },

    /// External tool exited unsuccessfully
    #[error("{tool} exited with code {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// An output the tool was expected to produce is absent
    #[error("Task '{plugin}' expected output at {path} but nothing was produced")]
    MissingOutput { plugin: String, path: PathBuf },

    /// Failed to start an external process
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },
}

/// Persisted cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored value has an unexpected shape
    #[error("Cache entry '{key}' is malformed: {message}")]
    Malformed { key: String, message: String },
}

impl FlotillaError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Create an internal error for an operation that must be overridden
    pub fn internal<S: Into<String>>(operation: S) -> Self {
        Self::Internal {
            operation: operation.into(),
        }
    }

    /// Whether this error must abort the whole run instead of being recorded
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Get exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Plugin(PluginError::ToolFailed { .. }) => 3,
            Self::Plugin(PluginError::MissingOutput { .. }) => 4,
            Self::Plugin(_) => 1,
            Self::Cache(_) => 5,
            Self::Internal { .. } => 70,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => 1,
        }
    }
}
