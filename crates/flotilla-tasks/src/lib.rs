//! Flotilla Tasks - task plugins and run orchestration
//!
//! Provides the task-plugin contract for plugins that run an external
//! process, the subprocess runner they go through, run reporting, and the
//! orchestrator that drives every sub-build of a run.

pub mod handlers;
pub mod orchestrator;
pub mod process;
pub mod reporter;
pub mod task;

pub use handlers::CommandHandler;
pub use orchestrator::{BuildPlan, BuildReport, LifecyclePlugin, Orchestrator, RunReport, SkippedPlugin};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, ShellRunner};
pub use reporter::{CollectingReporter, RunEvent, RunReporter, RunReporterRegistry, TracingReporter};
pub use task::{
    placeholder_name, HandlerRef, HandlerRegistry, TaskContext, TaskHandler, TaskOptions,
    TaskPlugin, TaskPluginFactory,
};
