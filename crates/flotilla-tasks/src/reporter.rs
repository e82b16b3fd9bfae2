//! Run progress reporting

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::coordinator::WaitOutcome;

/// Events emitted while a run progresses
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// A sub-build is starting with these plugins
    BuildStarted { build: String, plugins: Vec<String> },
    /// A plugin's guard failed
    PluginSkipped {
        build: String,
        plugin: String,
        reason: String,
    },
    /// A bounded wait ended
    WaitResolved {
        build: String,
        target: String,
        outcome: WaitOutcome,
    },
    /// Time spent in one hook point
    PhaseCompleted {
        build: String,
        point: String,
        duration: Duration,
    },
    /// A sub-build went through every phase
    BuildFinished {
        build: String,
        duration: Duration,
        errors: usize,
        warnings: usize,
    },
    /// Every sub-build finished
    RunCompleted {
        total: usize,
        failed: usize,
        duration: Duration,
    },
}

/// Trait for reporting run progress
pub trait RunReporter: Send + Sync {
    /// Handle a run event
    fn report(&self, event: &RunEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn report(&self, event: &RunEvent) {
        match event {
            RunEvent::BuildStarted { build, plugins } => {
                tracing::info!(build = %build, plugins = ?plugins, "build started");
            }
            RunEvent::PluginSkipped {
                build,
                plugin,
                reason,
            } => {
                tracing::info!(build = %build, plugin = %plugin, "plugin skipped: {}", reason);
            }
            RunEvent::WaitResolved {
                build,
                target,
                outcome,
            } => match outcome {
                WaitOutcome::TimedOut => {
                    tracing::warn!(build = %build, awaited = %target, "wait timed out")
                }
                _ => tracing::info!(build = %build, awaited = %target, outcome = ?outcome, "wait resolved"),
            },
            RunEvent::PhaseCompleted {
                build,
                point,
                duration,
            } => {
                tracing::debug!(build = %build, point = %point, "phase took {:.3}s", duration.as_secs_f64());
            }
            RunEvent::BuildFinished {
                build,
                duration,
                errors,
                warnings,
            } => {
                if *errors > 0 {
                    tracing::error!(
                        build = %build,
                        "{} finished with {} error(s), {} warning(s) in {:.1}s",
                        build,
                        errors,
                        warnings,
                        duration.as_secs_f64()
                    );
                } else {
                    tracing::info!(build = %build, "{} finished in {:.1}s", build, duration.as_secs_f64());
                }
            }
            RunEvent::RunCompleted {
                total,
                failed,
                duration,
            } => {
                tracing::info!(
                    "Run complete: {}/{} builds succeeded ({:.1}s)",
                    total - failed,
                    total,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<RunEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RunReporter for CollectingReporter {
    fn report(&self, event: &RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Registry of run reporters
pub struct RunReporterRegistry {
    reporters: Vec<Arc<dyn RunReporter>>,
}

impl RunReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: RunReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter the caller keeps a handle to
    pub fn register_arc(&mut self, reporter: Arc<dyn RunReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn RunReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &RunEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for RunReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunReporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunReporterRegistry")
            .field("reporters", &self.reporters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> RunEvent {
        RunEvent::BuildStarted {
            build: "lib".to_string(),
            plugins: vec!["lifecycle".to_string()],
        }
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        reporter.report(&started());
        reporter.report(&RunEvent::BuildFinished {
            build: "lib".to_string(),
            duration: Duration::from_secs(5),
            errors: 0,
            warnings: 1,
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(reporter.events()[0], started());
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;

        // Just verify it doesn't panic
        reporter.report(&started());
        reporter.report(&RunEvent::WaitResolved {
            build: "docs".to_string(),
            target: "lib".to_string(),
            outcome: WaitOutcome::TimedOut,
        });
        reporter.report(&RunEvent::RunCompleted {
            total: 2,
            failed: 1,
            duration: Duration::from_millis(1200),
        });
    }

    #[test]
    fn test_broadcast() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = RunReporterRegistry::empty();
        registry.register_arc(collecting.clone());

        registry.broadcast(&started());
        assert_eq!(collecting.events().len(), 1);
    }

    #[test]
    fn test_register() {
        let mut registry = RunReporterRegistry::empty();
        assert!(registry.all().is_empty());

        registry.register(TracingReporter);
        registry.register(CollectingReporter::default());
        assert_eq!(registry.all().len(), 2);
        assert_eq!(RunReporterRegistry::new().all().len(), 1);
    }
}
