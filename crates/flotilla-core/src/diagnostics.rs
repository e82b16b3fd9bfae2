//! Per-build message list
//!
//! Configuration, resource, and tool problems are not raised as errors that
//! stop the run. They are recorded here so the final report can show every
//! problem found, each with a stable code.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FlotillaError, PluginError};

/// Stable diagnostic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Missing or invalid option
    Configuration,
    /// Expected output absent after an external tool ran
    MissingResource,
    /// External tool exited unsuccessfully
    ToolFailure,
    /// A task handler returned an error
    HandlerFailure,
    /// Persisted cache could not be read or written
    CacheFailure,
    /// Contract violation inside flotilla
    Internal,
}

impl DiagnosticCode {
    /// Get the stable code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "FLT001",
            Self::MissingResource => "FLT002",
            Self::ToolFailure => "FLT003",
            Self::HandlerFailure => "FLT004",
            Self::CacheFailure => "FLT005",
            Self::Internal => "FLT900",
        }
    }

    /// Classify an error into its diagnostic code
    pub fn for_error(err: &FlotillaError) -> Self {
        match err {
            FlotillaError::Config(_) => Self::Configuration,
            FlotillaError::Plugin(PluginError::MissingOutput { .. }) => Self::MissingResource,
            FlotillaError::Plugin(PluginError::ToolFailed { .. })
            | FlotillaError::Plugin(PluginError::Spawn { .. }) => Self::ToolFailure,
            FlotillaError::Plugin(PluginError::HandlerFailed { .. }) => Self::HandlerFailure,
            FlotillaError::Cache(_) => Self::CacheFailure,
            FlotillaError::Internal { .. } => Self::Internal,
            FlotillaError::Io(_) | FlotillaError::Json(_) | FlotillaError::Other(_) => {
                Self::HandlerFailure
            }
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single recorded problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    /// Sub-build the message belongs to
    pub build: String,
    pub message: String,
}

impl Diagnostic {
    /// Create an error-severity diagnostic
    pub fn error(code: DiagnosticCode, build: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            build: build.into(),
            message: message.into(),
        }
    }

    /// Create a warning-severity diagnostic
    pub fn warning(
        code: DiagnosticCode,
        build: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            build: build.into(),
            message: message.into(),
        }
    }

    /// Build an error diagnostic from an error value
    pub fn from_error(build: impl Into<String>, err: &FlotillaError) -> Self {
        Self::error(DiagnosticCode::for_error(err), build, err.to_string())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.build, self.message)
    }
}

/// Shared, append-only list of diagnostics for one sub-build
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic
    pub fn push(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!(code = %diagnostic.code, build = %diagnostic.build, "{}", diagnostic.message),
            Severity::Warning => tracing::warn!(code = %diagnostic.code, build = %diagnostic.build, "{}", diagnostic.message),
        }
        self.lock().push(diagnostic);
    }

    /// Record an error value under the given build
    pub fn push_error(&self, build: &str, err: &FlotillaError) {
        self.push(Diagnostic::from_error(build, err));
    }

    /// Record a configuration error under the given build
    pub fn push_config_error(&self, build: &str, err: &ConfigError) {
        self.push(Diagnostic::error(
            DiagnosticCode::Configuration,
            build,
            err.to_string(),
        ));
    }

    /// Snapshot all entries in insertion order
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    /// Whether any error-severity diagnostic was recorded
    pub fn has_errors(&self) -> bool {
        self.lock().iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Diagnostic>> {
        // A poisoned list still holds every message pushed before the panic.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
