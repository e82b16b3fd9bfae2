//! Core types for Flotilla

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound for a cross-build wait
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Kind of output a sub-build produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// Library bundle
    #[default]
    Library,
    /// Generated documentation
    Documentation,
    /// Type-definition files
    Types,
    /// Anything else driven purely by task plugins
    Custom,
}

impl BuildKind {
    /// Returns the string representation of the build kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Documentation => "documentation",
            Self::Types => "types",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for BuildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BuildKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "library" | "lib" => Ok(Self::Library),
            "documentation" | "docs" => Ok(Self::Documentation),
            "types" => Ok(Self::Types),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("Unknown build kind: {}", s)),
        }
    }
}

/// Advisory dependency of one sub-build on another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSpec {
    /// Build whose completion is awaited
    pub target: String,
    /// Identifier of the waiter
    pub source: String,
    /// Upper bound on the wait
    pub timeout_ms: u64,
}

impl WaitSpec {
    /// Create a wait spec with the default timeout
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }

    /// Set the timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Name of the event that signals the target finished
    pub fn done_event(&self) -> String {
        done_event_name(&self.target)
    }
}

/// Event name emitted when a build completes
pub fn done_event_name(build: &str) -> String {
    format!("{}_done", build)
}

/// One independently configured build target within a run.
///
/// Immutable for the run once created; fingerprint state lives with the
/// plugins that own it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBuild {
    pub name: String,
    pub kind: BuildKind,
    /// Working directory for tasks
    pub root: PathBuf,
    /// Whether this is the only build selected for the run
    pub sole_build_in_run: bool,
    pub wait: Option<WaitSpec>,
}

impl SubBuild {
    /// Create a new sub-build rooted at the current directory
    pub fn new(name: impl Into<String>, kind: BuildKind) -> Self {
        Self {
            name: name.into(),
            kind,
            root: PathBuf::from("."),
            sole_build_in_run: false,
            wait: None,
        }
    }

    /// Set the root directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Mark whether this build runs alone
    pub fn with_sole_build(mut self, sole: bool) -> Self {
        self.sole_build_in_run = sole;
        self
    }

    /// Set the wait spec
    pub fn with_wait(mut self, wait: WaitSpec) -> Self {
        self.wait = Some(wait);
        self
    }
}
