//! Run orchestration
//!
//! One run turns every selected build into a [`SubBuild`], constructs its
//! plugins through their factories, and drives all sub-builds to completion
//! concurrently on the calling task. Sub-builds only order themselves
//! against each other through the run's [`Coordinator`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, instrument};

use flotilla_core::cache::KeyValueCache;
use flotilla_core::config::{BuildConfig, Config};
use flotilla_core::coordinator::{Coordinator, EventStage, WaitOutcome};
use flotilla_core::diagnostics::{Diagnostic, Diagnostics, Severity};
use flotilla_core::engine::{Engine, PhaseContext};
use flotilla_core::error::{ConfigError, FlotillaError, Result};
use flotilla_core::fingerprint::FingerprintFactory;
use flotilla_core::hooks::{Phase, Stage, TapAdapter, TapDescriptor};
use flotilla_core::plugins::{instantiate, FactoryContext, Instantiated, Plugin, PluginFactory, PluginSet};
use flotilla_core::types::{done_event_name, SubBuild};

use crate::process::{ProcessRunner, ShellRunner};
use crate::reporter::{RunEvent, RunReporterRegistry};
use crate::task::{HandlerRegistry, TaskOptions, TaskPluginFactory};

/// Waits for the build's dependency up front and announces completion at the end
pub struct LifecyclePlugin {
    taps: TapAdapter,
}

impl LifecyclePlugin {
    pub const NAME: &'static str = "lifecycle";

    pub fn new(coordinator: Coordinator, reporters: Arc<RunReporterRegistry>) -> Self {
        let waiter = coordinator.clone();
        let taps = TapAdapter::new(Self::NAME)
            .with(
                "wait",
                TapDescriptor::future(Phase::BeforeRun, move |ctx| {
                    let coordinator = waiter.clone();
                    let reporters = reporters.clone();
                    async move {
                        let outcome = coordinator.wait_for(&ctx.build).await;
                        if let (Some(spec), false) = (&ctx.build.wait, outcome == WaitOutcome::Skipped) {
                            reporters.broadcast(&RunEvent::WaitResolved {
                                build: ctx.build.name.clone(),
                                target: spec.target.clone(),
                                outcome,
                            });
                        }
                        Ok(())
                    }
                }),
            )
            .with(
                "done",
                TapDescriptor::future(Phase::Done, move |ctx| {
                    let coordinator = coordinator.clone();
                    async move {
                        let name = &ctx.build.name;
                        let stage = if ctx.diagnostics.has_errors() {
                            EventStage::Failed
                        } else {
                            EventStage::Done
                        };
                        coordinator.emit(&done_event_name(name), name, stage);
                        coordinator.mark_done(name, Vec::new()).await;
                        Ok(())
                    }
                })
                .with_stage(Stage::Report),
            );

        Self { taps }
    }
}

impl Plugin for LifecyclePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, engine: &mut Engine) {
        self.taps.apply(engine);
    }
}

/// A plugin left out of a build, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPlugin {
    pub plugin: String,
    pub reason: String,
}

/// One sub-build with its plugins constructed, ready to run
pub struct BuildPlan {
    pub build: SubBuild,
    pub plugins: PluginSet,
    pub skipped: Vec<SkippedPlugin>,
    /// Holds construction errors; the run appends to it
    pub diagnostics: Diagnostics,
}

impl std::fmt::Debug for BuildPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPlan")
            .field("build", &self.build.name)
            .field("plugins", &self.plugins)
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Result of one sub-build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub name: String,
    pub plugins: Vec<String>,
    pub skipped: Vec<SkippedPlugin>,
    pub diagnostics: Vec<Diagnostic>,
    /// Output units left in the compilation
    pub outputs: Vec<String>,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub builds: Vec<BuildReport>,
    pub duration_ms: u64,
    /// The run's coordinator, holding its done-set and event history
    #[serde(skip)]
    pub coordinator: Coordinator,
}

impl RunReport {
    /// Whether any build recorded an error-severity diagnostic
    pub fn has_errors(&self) -> bool {
        self.builds.iter().any(BuildReport::has_errors)
    }

    /// Every diagnostic, in build order
    pub fn diagnostics(&self) -> Vec<&Diagnostic> {
        self.builds.iter().flat_map(|b| b.diagnostics.iter()).collect()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn build(&self, name: &str) -> Option<&BuildReport> {
        self.builds.iter().find(|b| b.name == name)
    }
}

/// Drives every configured sub-build through one run
pub struct Orchestrator {
    config: Config,
    project_root: PathBuf,
    handlers: Arc<HandlerRegistry>,
    cache: Option<Arc<dyn KeyValueCache>>,
    runner: Arc<dyn ProcessRunner>,
    reporters: Arc<RunReporterRegistry>,
}

impl Orchestrator {
    /// Create an orchestrator with built-in handlers, the shell runner, and no cache
    pub fn new(config: Config, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            handlers: Arc::new(HandlerRegistry::new()),
            cache: None,
            runner: Arc::new(ShellRunner),
            reporters: Arc::new(RunReporterRegistry::new()),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Persist fingerprints through this cache (ignored when caching is disabled in config)
    pub fn with_cache(mut self, cache: Arc<dyn KeyValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_reporters(mut self, reporters: RunReporterRegistry) -> Self {
        self.reporters = Arc::new(reporters);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Builds selected by name; an empty filter selects all of them
    pub fn select(&self, filter: &[String]) -> Result<Vec<&BuildConfig>> {
        if filter.is_empty() {
            return Ok(self.config.builds.iter().collect());
        }
        filter
            .iter()
            .map(|name| {
                self.config.build(name).ok_or_else(|| {
                    FlotillaError::from(ConfigError::InvalidValue {
                        field: "build".to_string(),
                        message: format!(
                            "unknown build '{}' (available: {})",
                            name,
                            self.config.build_names().join(", ")
                        ),
                    })
                })
            })
            .collect()
    }

    /// Construct the plugins of every selected build against a fresh coordinator.
    ///
    /// Guard failures are recorded as skips. Construction errors become
    /// diagnostics on that build and the plugin is left out.
    pub fn plan(&self, filter: &[String]) -> Result<Vec<BuildPlan>> {
        self.plan_with(filter, &Coordinator::new())
    }

    fn plan_with(&self, filter: &[String], coordinator: &Coordinator) -> Result<Vec<BuildPlan>> {
        let selected = self.select(filter)?;
        let sole = selected.len() == 1;
        let cache = if self.config.cache.enabled {
            self.cache.clone()
        } else {
            None
        };

        selected
            .into_iter()
            .map(|config| {
                let build = config.to_sub_build(&self.project_root, sole);
                self.plan_build(build, config, coordinator, cache.clone())
            })
            .collect()
    }

    fn plan_build(
        &self,
        build: SubBuild,
        config: &BuildConfig,
        coordinator: &Coordinator,
        cache: Option<Arc<dyn KeyValueCache>>,
    ) -> Result<BuildPlan> {
        let diagnostics = Diagnostics::new();
        let mut plugins = PluginSet::new();
        let mut skipped = Vec::new();

        plugins.push(Box::new(LifecyclePlugin::new(
            coordinator.clone(),
            self.reporters.clone(),
        )));

        let mut factories: Vec<Box<dyn PluginFactory>> = vec![Box::new(FingerprintFactory)];
        for task in &config.tasks {
            factories.push(Box::new(TaskPluginFactory::new(
                TaskOptions::from(task),
                self.handlers.clone(),
                self.runner.clone(),
            )));
        }

        let ctx = FactoryContext {
            build: &build,
            coordinator,
            cache,
        };
        for factory in &factories {
            match instantiate(factory.as_ref(), &ctx) {
                Ok(Instantiated::Plugin(plugin)) => plugins.push(plugin),
                Ok(Instantiated::Skipped { plugin, reason }) => {
                    skipped.push(SkippedPlugin { plugin, reason })
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => diagnostics.push_error(&build.name, &err),
            }
        }

        debug!(build = %build.name, plugins = ?plugins.names(), skipped = skipped.len(), "build planned");
        Ok(BuildPlan {
            build,
            plugins,
            skipped,
            diagnostics,
        })
    }

    /// Run the selected builds concurrently.
    ///
    /// Every run gets its own coordinator, so completions from an earlier
    /// run never satisfy a wait in this one. Returns `Err` only for internal
    /// errors; everything else is reported through the diagnostics in the
    /// returned report.
    pub async fn run(&self, filter: &[String]) -> Result<RunReport> {
        let start = Instant::now();
        let coordinator = Coordinator::new();
        let plans = self.plan_with(filter, &coordinator)?;
        coordinator.set_active_builds(plans.iter().map(|p| p.build.name.clone()));
        info!(builds = plans.len(), "starting run");

        let builds = try_join_all(plans.into_iter().map(|plan| self.run_build(plan))).await?;

        let report = RunReport {
            builds,
            duration_ms: start.elapsed().as_millis() as u64,
            coordinator,
        };
        self.reporters.broadcast(&RunEvent::RunCompleted {
            total: report.builds.len(),
            failed: report.builds.iter().filter(|b| b.has_errors()).count(),
            duration: start.elapsed(),
        });
        Ok(report)
    }

    #[instrument(skip_all, fields(build = %plan.build.name))]
    async fn run_build(&self, plan: BuildPlan) -> Result<BuildReport> {
        let start = Instant::now();
        let name = plan.build.name.clone();
        self.reporters.broadcast(&RunEvent::BuildStarted {
            build: name.clone(),
            plugins: plan.plugins.names(),
        });
        for skip in &plan.skipped {
            self.reporters.broadcast(&RunEvent::PluginSkipped {
                build: name.clone(),
                plugin: skip.plugin.clone(),
                reason: skip.reason.clone(),
            });
        }

        let mut engine = Engine::new();
        plan.plugins.apply_all(&mut engine);
        let ctx = PhaseContext::new(plan.build).with_diagnostics(plan.diagnostics);

        let outcome = engine.run(&ctx).await;
        plan.plugins.dispose_all();
        outcome?;

        let mut phases: BTreeMap<String, Duration> = BTreeMap::new();
        for timing in engine.hooks().timings() {
            *phases.entry(timing.point.to_string()).or_default() += timing.duration;
        }
        for (point, duration) in phases {
            self.reporters.broadcast(&RunEvent::PhaseCompleted {
                build: name.clone(),
                point,
                duration,
            });
        }

        let diagnostics = ctx.diagnostics.entries();
        let errors = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        self.reporters.broadcast(&RunEvent::BuildFinished {
            build: name.clone(),
            duration: start.elapsed(),
            errors,
            warnings: diagnostics.len() - errors,
        });

        Ok(BuildReport {
            name,
            plugins: plan.plugins.names(),
            skipped: plan.skipped,
            diagnostics,
            outputs: ctx.compilation.names(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("builds", &self.config.build_names())
            .field("project_root", &self.project_root)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}
