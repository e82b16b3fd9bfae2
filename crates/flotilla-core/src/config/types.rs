//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{BuildKind, SubBuild, WaitSpec, DEFAULT_WAIT_TIMEOUT_MS};

/// Main configuration for Flotilla
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Persisted cache configuration
    pub cache: CacheConfig,

    /// Sub-builds, in declaration order
    pub builds: Vec<BuildConfig>,
}

impl Config {
    /// Look up a build by name
    pub fn build(&self, name: &str) -> Option<&BuildConfig> {
        self.builds.iter().find(|b| b.name == name)
    }

    /// Build names in declaration order
    pub fn build_names(&self) -> Vec<&str> {
        self.builds.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Persisted cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory, relative to the project root
    pub dir: PathBuf,

    /// Whether fingerprints are persisted between runs
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".flotilla/cache"),
            enabled: true,
        }
    }
}

/// One sub-build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build name, unique within the configuration
    pub name: String,

    /// Build kind (library, documentation, types, custom)
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Working directory for tasks, relative to the project root
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Optional wait on another build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitConfig>,

    /// Task plugins for this build
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

fn default_kind() -> String {
    BuildKind::Library.as_str().to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl BuildConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            root: default_root(),
            wait: None,
            tasks: Vec::new(),
        }
    }

    /// Parsed build kind
    pub fn build_kind(&self) -> Option<BuildKind> {
        self.kind.parse().ok()
    }

    /// Resolve the wait section into a [`WaitSpec`], defaulting the source
    /// to this build's name
    pub fn wait_spec(&self) -> Option<WaitSpec> {
        self.wait.as_ref().map(|w| {
            let source = w.source.clone().unwrap_or_else(|| self.name.clone());
            WaitSpec::new(&w.target, source).with_timeout_ms(w.timeout_ms)
        })
    }

    /// Build the runtime sub-build, resolving `root` against `project_root`
    pub fn to_sub_build(&self, project_root: &Path, sole_build_in_run: bool) -> SubBuild {
        let root = if self.root.is_absolute() {
            self.root.clone()
        } else {
            project_root.join(&self.root)
        };
        let mut build = SubBuild::new(&self.name, self.build_kind().unwrap_or_default())
            .with_root(root)
            .with_sole_build(sole_build_in_run);
        if let Some(wait) = self.wait_spec() {
            build = build.with_wait(wait);
        }
        build
    }
}

/// Wait on another build's completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Build to wait for
    pub target: String,

    /// Waiter identifier; defaults to the owning build's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Upper bound on the wait in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

/// One task plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name, used in hook names and reports
    pub name: String,

    /// Handler name, resolved against the handler registry
    #[serde(default = "default_handler")]
    pub handler: String,

    /// Command line for the command handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// External tool that must be on PATH for the task to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Build option enabling the task
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Glob patterns the task is expected to produce, relative to the build root
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Extra environment for the tool
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_handler() -> String {
    "command".to_string()
}

fn default_true() -> bool {
    true
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: default_handler(),
            command: None,
            tool: None,
            enabled: true,
            outputs: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.dir, PathBuf::from(".flotilla/cache"));
        assert!(config.builds.is_empty());
    }

    #[test]
    fn test_build_defaults_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [[builds]]
            name = "lib"

            [[builds.tasks]]
            name = "bundle"
            command = "make"
            "#,
        )
        .unwrap();

        let build = config.build("lib").unwrap();
        assert_eq!(build.build_kind(), Some(BuildKind::Library));
        assert_eq!(build.root, PathBuf::from("."));
        assert_eq!(build.tasks[0].handler, "command");
        assert!(build.tasks[0].enabled);
    }

    #[test]
    fn test_wait_spec_source_defaults_to_build_name() {
        let mut build = BuildConfig::new("docs");
        build.wait = Some(WaitConfig {
            target: "types".to_string(),
            source: None,
            timeout_ms: default_timeout_ms(),
        });

        let wait = build.wait_spec().unwrap();
        assert_eq!(wait.source, "docs");
        assert_eq!(wait.target, "types");
        assert_eq!(wait.timeout_ms, 30_000);
    }

    #[test]
    fn test_to_sub_build_resolves_root() {
        let mut build = BuildConfig::new("docs");
        build.kind = "docs".to_string();
        build.root = PathBuf::from("packages/docs");

        let sub = build.to_sub_build(Path::new("/repo"), true);
        assert_eq!(sub.root, PathBuf::from("/repo/packages/docs"));
        assert_eq!(sub.kind, BuildKind::Documentation);
        assert!(sub.sole_build_in_run);
        assert!(sub.wait.is_none());
    }
}
