//! Plugin System - conditional construction and lifecycle of build plugins
//!
//! A plugin attaches callbacks to a sub-build's engine in `apply` and
//! releases anything it holds in `dispose`. Plugins are built through a
//! [`PluginFactory`], whose guard checks preconditions first:
//! - a required external tool is on PATH
//! - the build option enabling the plugin is set
//!
//! A failed guard means the plugin is skipped. That is normal and silent,
//! never an error.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::KeyValueCache;
use crate::coordinator::Coordinator;
use crate::engine::Engine;
use crate::error::Result;
use crate::types::SubBuild;

/// A constructed plugin bound to one sub-build
pub trait Plugin: Send + Sync {
    /// Plugin name, used in hook names and reports
    fn name(&self) -> &str;

    /// Attach callbacks to the engine
    fn apply(&self, engine: &mut Engine);

    /// Release resources once the build finished
    fn dispose(&self) {}
}

/// What a factory sees when deciding whether and how to build a plugin
#[derive(Clone)]
pub struct FactoryContext<'a> {
    pub build: &'a SubBuild,
    pub coordinator: &'a Coordinator,
    /// Persisted cache, absent when caching is disabled
    pub cache: Option<Arc<dyn KeyValueCache>>,
}

impl std::fmt::Debug for FactoryContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext")
            .field("build", &self.build.name)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Result of a factory's precondition check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Pass,
    Skip(String),
}

impl Guard {
    /// Skip with a reason
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Builds a plugin when its preconditions hold
pub trait PluginFactory: Send + Sync {
    /// Name of the plugin this factory builds
    fn name(&self) -> &str;

    /// Check preconditions before construction
    fn guard(&self, _ctx: &FactoryContext<'_>) -> Guard {
        Guard::Pass
    }

    /// Construct the plugin. Configuration errors surface here, before any
    /// lifecycle phase runs.
    fn create(&self, ctx: &FactoryContext<'_>) -> Result<Box<dyn Plugin>>;
}

/// Outcome of running a factory
pub enum Instantiated {
    Plugin(Box<dyn Plugin>),
    Skipped { plugin: String, reason: String },
}

impl std::fmt::Debug for Instantiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plugin(p) => f.debug_tuple("Plugin").field(&p.name()).finish(),
            Self::Skipped { plugin, reason } => f
                .debug_struct("Skipped")
                .field("plugin", plugin)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Run a factory's guard, then construct the plugin if it passed
pub fn instantiate(factory: &dyn PluginFactory, ctx: &FactoryContext<'_>) -> Result<Instantiated> {
    match factory.guard(ctx) {
        Guard::Pass => {
            let plugin = factory.create(ctx)?;
            debug!(build = %ctx.build.name, plugin = plugin.name(), "plugin constructed");
            Ok(Instantiated::Plugin(plugin))
        }
        Guard::Skip(reason) => {
            info!(build = %ctx.build.name, plugin = factory.name(), reason = %reason, "plugin skipped");
            Ok(Instantiated::Skipped {
                plugin: factory.name().to_string(),
                reason,
            })
        }
    }
}

/// The plugins constructed for one sub-build
#[derive(Default)]
pub struct PluginSet {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Plugin names in apply order
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Apply every plugin in insertion order
    pub fn apply_all(&self, engine: &mut Engine) {
        for plugin in &self.plugins {
            plugin.apply(engine);
        }
    }

    /// Dispose every plugin in reverse order
    pub fn dispose_all(&self) {
        for plugin in self.plugins.iter().rev() {
            plugin.dispose();
        }
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
