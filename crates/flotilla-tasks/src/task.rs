//! Task plugins
//!
//! A task plugin runs an external, side-effecting job (a compiler, a
//! documentation generator, an upload) instead of transforming build input.
//! Its lifecycle within one sub-build:
//! 1. `Make`: add a placeholder unit so the compilation has something to process
//! 2. `process-assets` (additional stage): run the handler, then drop the placeholder
//! 3. `Shutdown`: remove temporary directories, logging failures only

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use flotilla_core::config::TaskConfig;
use flotilla_core::coordinator::Coordinator;
use flotilla_core::engine::{Artifact, Engine, PhaseContext};
use flotilla_core::error::{ConfigError, FlotillaError, PluginError, Result};
use flotilla_core::hooks::{Phase, Stage, SubPhase, TapAdapter, TapDescriptor};
use flotilla_core::plugins::{FactoryContext, Guard, Plugin, PluginFactory};

use crate::handlers::CommandHandler;
use crate::process::ProcessRunner;

/// Prefix of placeholder unit names
pub const PLACEHOLDER_PREFIX: &str = "__flotilla_task__/";

/// Name of the placeholder unit for a task
pub fn placeholder_name(task: &str) -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, task)
}

/// The work a task plugin performs
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handler name, as referenced from configuration
    fn name(&self) -> &str;

    /// Check the task's options at construction time
    fn validate(&self, _options: &TaskOptions) -> std::result::Result<(), ConfigError> {
        Ok(())
    }

    /// Perform the task. Handlers must override this.
    async fn run(&self, _ctx: &TaskContext) -> Result<()> {
        Err(FlotillaError::internal(format!("{}::run", self.name())))
    }
}

/// Named handlers available to task plugins
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Registry with the built-in handlers
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(CommandHandler);
        registry
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<H: TaskHandler + 'static>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// How a task names its handler
#[derive(Clone)]
pub enum HandlerRef {
    /// Looked up in the [`HandlerRegistry`]
    Named(String),
    /// Supplied directly
    Direct(Arc<dyn TaskHandler>),
}

impl HandlerRef {
    /// Resolve to a handler, once, at construction
    pub fn resolve(
        &self,
        plugin: &str,
        registry: &HandlerRegistry,
    ) -> std::result::Result<Arc<dyn TaskHandler>, ConfigError> {
        match self {
            Self::Direct(handler) => Ok(handler.clone()),
            Self::Named(name) => registry.get(name).ok_or_else(|| ConfigError::UnresolvedHandler {
                plugin: plugin.to_string(),
                handler: name.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Direct(handler) => f.debug_tuple("Direct").field(&handler.name()).finish(),
        }
    }
}

/// Options for one task plugin
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub name: String,
    pub handler: HandlerRef,
    pub command: Option<String>,
    /// Tool that must be on PATH
    pub tool: Option<String>,
    pub enabled: bool,
    /// Output globs, relative to the build root
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl TaskOptions {
    pub fn new(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self {
            name: name.into(),
            handler,
            command: None,
            tool: None,
            enabled: true,
            outputs: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_output(mut self, pattern: impl Into<String>) -> Self {
        self.outputs.push(pattern.into());
        self
    }
}

impl From<&TaskConfig> for TaskOptions {
    fn from(config: &TaskConfig) -> Self {
        Self {
            name: config.name.clone(),
            handler: HandlerRef::Named(config.handler.clone()),
            command: config.command.clone(),
            tool: config.tool.clone(),
            enabled: config.enabled,
            outputs: config.outputs.clone(),
            env: config.env.clone(),
        }
    }
}

/// Temporary directories owned by one task
#[derive(Debug, Default)]
struct TempDirs {
    dirs: Mutex<Vec<TempDir>>,
}

impl TempDirs {
    fn create(&self, task: &str) -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("flotilla-{}-", task))
            .tempdir()?;
        let path = dir.path().to_path_buf();
        self.dirs.lock().unwrap_or_else(|e| e.into_inner()).push(dir);
        Ok(path)
    }

    fn cleanup(&self, task: &str) {
        let dirs = std::mem::take(&mut *self.dirs.lock().unwrap_or_else(|e| e.into_inner()));
        for dir in dirs {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(task, path = %path.display(), "removed temp dir"),
                Err(e) => warn!(task, path = %path.display(), error = %e, "failed to remove temp dir"),
            }
        }
    }
}

/// What a handler sees while it runs
#[derive(Clone)]
pub struct TaskContext {
    pub options: Arc<TaskOptions>,
    pub phase: PhaseContext,
    pub runner: Arc<dyn ProcessRunner>,
    pub coordinator: Coordinator,
    temp_dirs: Arc<TempDirs>,
}

impl TaskContext {
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Working directory of the sub-build
    pub fn root(&self) -> &Path {
        &self.phase.build.root
    }

    /// Create a temporary directory, removed at shutdown
    pub fn temp_dir(&self) -> Result<PathBuf> {
        self.temp_dirs.create(&self.options.name)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.options.name)
            .field("build", &self.phase.build.name)
            .finish()
    }
}

/// Keep handler errors classifiable; anything unclassified becomes a handler failure
fn classify(task: &str, err: FlotillaError) -> FlotillaError {
    match err {
        FlotillaError::Plugin(_)
        | FlotillaError::Config(_)
        | FlotillaError::Cache(_)
        | FlotillaError::Internal { .. } => err,
        other => PluginError::HandlerFailed {
            plugin: task.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

/// Plugin running one configured task
pub struct TaskPlugin {
    name: String,
    handler: Arc<dyn TaskHandler>,
    taps: TapAdapter,
    temp_dirs: Arc<TempDirs>,
}

impl TaskPlugin {
    /// Resolve the handler and prepare the lifecycle taps.
    ///
    /// An unresolvable handler or invalid options fail here, before any
    /// phase runs.
    pub fn new(
        options: TaskOptions,
        registry: &HandlerRegistry,
        runner: Arc<dyn ProcessRunner>,
        coordinator: Coordinator,
    ) -> Result<Self> {
        let handler = options.handler.resolve(&options.name, registry)?;
        handler.validate(&options)?;

        let options = Arc::new(options);
        let temp_dirs = Arc::new(TempDirs::default());
        let name = options.name.clone();
        let placeholder = placeholder_name(&name);

        let run_handler = handler.clone();
        let run_options = options.clone();
        let run_temp = temp_dirs.clone();
        let run_placeholder = placeholder.clone();
        let cleanup_name = name.clone();
        let cleanup_temp = temp_dirs.clone();

        let taps = TapAdapter::new(&name)
            .with(
                "placeholder",
                TapDescriptor::sync(Phase::Make, move |ctx| {
                    ctx.compilation.add(&placeholder, Artifact::new(Vec::new()));
                    Ok(())
                }),
            )
            .with(
                "run",
                TapDescriptor::future(Phase::ThisCompilation, move |ctx| {
                    let handler = run_handler.clone();
                    let task_ctx = TaskContext {
                        options: run_options.clone(),
                        runner: runner.clone(),
                        coordinator: coordinator.clone(),
                        temp_dirs: run_temp.clone(),
                        phase: ctx,
                    };
                    let placeholder = run_placeholder.clone();
                    async move {
                        info!(build = %task_ctx.phase.build.name, task = task_ctx.name(), handler = handler.name(), "running task");
                        let result = handler.run(&task_ctx).await;
                        task_ctx.phase.compilation.delete(&placeholder);
                        result.map_err(|e| classify(task_ctx.name(), e))
                    }
                })
                .in_compilation(SubPhase::ProcessAssets)
                .with_stage(Stage::Additional),
            )
            .with(
                "cleanup",
                TapDescriptor::sync(Phase::Shutdown, move |_| {
                    cleanup_temp.cleanup(&cleanup_name);
                    Ok(())
                }),
            );

        Ok(Self {
            name,
            handler,
            taps,
            temp_dirs,
        })
    }

    pub fn handler(&self) -> &Arc<dyn TaskHandler> {
        &self.handler
    }

    pub fn taps(&self) -> &TapAdapter {
        &self.taps
    }
}

impl Plugin for TaskPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, engine: &mut Engine) {
        self.taps.apply(engine);
    }

    /// Remove temp dirs left behind when `Shutdown` never fired
    fn dispose(&self) {
        self.temp_dirs.cleanup(&self.name);
    }
}

impl std::fmt::Debug for TaskPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPlugin")
            .field("name", &self.name)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Builds a [`TaskPlugin`] when its build option is on and its tool is installed
pub struct TaskPluginFactory {
    options: TaskOptions,
    handlers: Arc<HandlerRegistry>,
    runner: Arc<dyn ProcessRunner>,
}

impl TaskPluginFactory {
    pub fn new(
        options: TaskOptions,
        handlers: Arc<HandlerRegistry>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            options,
            handlers,
            runner,
        }
    }
}

impl PluginFactory for TaskPluginFactory {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn guard(&self, _ctx: &FactoryContext<'_>) -> Guard {
        if !self.options.enabled {
            return Guard::skip("disabled by build options");
        }
        if let Some(tool) = &self.options.tool {
            if which::which(tool).is_err() {
                return Guard::skip(format!("'{}' not found on PATH", tool));
            }
        }
        Guard::Pass
    }

    fn create(&self, ctx: &FactoryContext<'_>) -> Result<Box<dyn Plugin>> {
        let plugin = TaskPlugin::new(
            self.options.clone(),
            &self.handlers,
            self.runner.clone(),
            ctx.coordinator.clone(),
        )?;
        Ok(Box::new(plugin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandSpec, ProcessOutput};
    use flotilla_core::diagnostics::DiagnosticCode;
    use flotilla_core::hooks::HookPoint;
    use flotilla_core::plugins::{instantiate, Instantiated};
    use flotilla_core::types::{BuildKind, SubBuild};

    struct NoopRunner;

    #[async_trait]
    impl ProcessRunner for NoopRunner {
        async fn run(&self, _spec: &CommandSpec) -> Result<ProcessOutput> {
            Ok(ProcessOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    /// Records what it saw, optionally failing
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for RecordingHandler {
        fn name(&self) -> &str {
            "recording"
        }

        async fn run(&self, ctx: &TaskContext) -> Result<()> {
            let temp = ctx.temp_dir()?;
            std::fs::write(temp.join("scratch.txt"), "x")?;
            self.seen.lock().unwrap().push(temp.display().to_string());
            self.seen.lock().unwrap().extend(ctx.phase.compilation.names());
            if self.fail {
                return Err(FlotillaError::other("generator crashed"));
            }
            Ok(())
        }
    }

    /// Forgets to override `run`
    struct AbstractHandler;

    impl TaskHandler for AbstractHandler {
        fn name(&self) -> &str {
            "abstract"
        }
    }

    fn recording(fail: bool) -> (Arc<Mutex<Vec<String>>>, TaskOptions) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = RecordingHandler {
            seen: seen.clone(),
            fail,
        };
        let options = TaskOptions::new("docs", HandlerRef::Direct(Arc::new(handler)));
        (seen, options)
    }

    fn plugin(options: TaskOptions) -> Result<TaskPlugin> {
        TaskPlugin::new(
            options,
            &HandlerRegistry::new(),
            Arc::new(NoopRunner),
            Coordinator::new(),
        )
    }

    async fn run(plugin: &TaskPlugin) -> (Result<()>, PhaseContext) {
        let mut engine = Engine::new();
        plugin.apply(&mut engine);
        let ctx = PhaseContext::new(SubBuild::new("lib", BuildKind::Library));
        let result = engine.run(&ctx).await;
        (result, ctx)
    }

    #[test]
    fn test_unresolved_handler_is_config_error() {
        let options = TaskOptions::new("docs", HandlerRef::Named("missing".to_string()));
        let err = plugin(options).unwrap_err();
        assert!(matches!(
            err,
            FlotillaError::Config(ConfigError::UnresolvedHandler { ref plugin, ref handler })
                if plugin == "docs" && handler == "missing"
        ));
    }

    #[test]
    fn test_registry_has_builtin_command() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.names(), vec!["command"]);
        assert!(HandlerRegistry::empty().names().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_placeholder_and_cleanup() {
        let (seen, options) = recording(false);
        let plugin = plugin(options).unwrap();
        assert_eq!(plugin.taps().tasks().collect::<Vec<_>>(), vec!["placeholder", "run", "cleanup"]);

        let (result, ctx) = run(&plugin).await;
        result.unwrap();

        let seen = seen.lock().unwrap().clone();
        // handler saw the placeholder, which is gone afterwards
        assert_eq!(seen[1], placeholder_name("docs"));
        assert!(ctx.compilation.is_empty());
        // temp dir removed at shutdown
        assert!(!Path::new(&seen[0]).exists());
        assert!(ctx.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_dispose_removes_temp_dirs_without_shutdown() {
        let (seen, options) = recording(false);
        let plugin = plugin(options).unwrap();
        let mut engine = Engine::new();
        plugin.apply(&mut engine);

        let ctx = PhaseContext::new(SubBuild::new("lib", BuildKind::Library));
        engine
            .hooks()
            .call(HookPoint::compilation(SubPhase::ProcessAssets), &ctx)
            .await
            .unwrap();
        let temp = PathBuf::from(seen.lock().unwrap()[0].clone());
        assert!(temp.exists());

        plugin.dispose();
        assert!(!temp.exists());
        // a second cleanup finds nothing left to remove
        plugin.dispose();
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_diagnostic() {
        let (_, options) = recording(true);
        let plugin = plugin(options).unwrap();

        let (result, ctx) = run(&plugin).await;
        assert!(result.is_ok());
        assert!(ctx.compilation.is_empty());

        let entries = ctx.diagnostics.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].code, DiagnosticCode::HandlerFailure);
        assert!(entries[0].message.contains("generator crashed"));
    }

    #[tokio::test]
    async fn test_unimplemented_run_is_fatal() {
        let options = TaskOptions::new("docs", HandlerRef::Direct(Arc::new(AbstractHandler)));
        let plugin = plugin(options).unwrap();

        let (result, ctx) = run(&plugin).await;
        assert!(matches!(result, Err(FlotillaError::Internal { .. })));
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn test_factory_guard() {
        let build = SubBuild::new("lib", BuildKind::Library);
        let coordinator = Coordinator::new();
        let ctx = FactoryContext {
            build: &build,
            coordinator: &coordinator,
            cache: None,
        };
        let factory = |options: TaskOptions| {
            TaskPluginFactory::new(options, Arc::new(HandlerRegistry::new()), Arc::new(NoopRunner))
        };

        let disabled = factory(
            TaskOptions::new("docs", HandlerRef::Named("missing".to_string())).with_enabled(false),
        );
        assert_eq!(disabled.guard(&ctx), Guard::skip("disabled by build options"));
        // a skipped plugin is never constructed, so its bad handler is not reported
        assert!(matches!(
            instantiate(&disabled, &ctx).unwrap(),
            Instantiated::Skipped { .. }
        ));

        let no_tool = factory(
            TaskOptions::new("docs", HandlerRef::Named("command".to_string()))
                .with_tool("flotilla-no-such-tool-7f3a"),
        );
        assert!(!no_tool.guard(&ctx).passed());

        let (_, options) = recording(false);
        assert!(factory(options).guard(&ctx).passed());
    }
}
