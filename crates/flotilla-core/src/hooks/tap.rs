//! Declarative tap tables
//!
//! A plugin describes every callback it needs as a named [`TapDescriptor`]
//! and hands the table to a [`TapAdapter`]. Applying the adapter binds each
//! entry onto the engine's hook set at the right phase, sub-phase and stage.

use crate::engine::{Engine, PhaseContext};
use crate::error::Result;

use super::{HookPoint, Phase, Stage, SubPhase, TapCallback};

/// Where and how one callback attaches
#[derive(Debug, Clone)]
pub struct TapDescriptor {
    pub phase: Phase,
    /// Nested per-compilation phase, if any
    pub sub_phase: Option<SubPhase>,
    pub stage: Option<Stage>,
    /// Key used when recording timings
    pub stats_key: Option<String>,
    pub callback: TapCallback,
}

impl TapDescriptor {
    /// Attach a synchronous callback at a compiler-level phase
    pub fn sync<F>(phase: Phase, f: F) -> Self
    where
        F: Fn(&PhaseContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(phase, TapCallback::sync(f))
    }

    /// Attach a future-returning callback at a compiler-level phase
    pub fn future<F, Fut>(phase: Phase, f: F) -> Self
    where
        F: Fn(PhaseContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(phase, TapCallback::future(f))
    }

    fn new(phase: Phase, callback: TapCallback) -> Self {
        Self {
            phase,
            sub_phase: None,
            stage: None,
            stats_key: None,
            callback,
        }
    }

    /// Move the callback into a nested per-compilation phase
    pub fn in_compilation(mut self, sub_phase: SubPhase) -> Self {
        self.phase = Phase::ThisCompilation;
        self.sub_phase = Some(sub_phase);
        self
    }

    /// Set the ordering stage
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Set the timing key
    pub fn with_stats_key(mut self, key: impl Into<String>) -> Self {
        self.stats_key = Some(key.into());
        self
    }

    pub fn is_async(&self) -> bool {
        self.callback.is_async()
    }

    pub fn point(&self) -> HookPoint {
        HookPoint {
            phase: self.phase,
            sub_phase: self.sub_phase,
        }
    }
}

/// Table of logical task name to descriptor, owned by a plugin
#[derive(Debug, Clone, Default)]
pub struct TapAdapter {
    plugin: String,
    entries: Vec<(String, TapDescriptor)>,
}

impl TapAdapter {
    /// Create an empty table for a plugin
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            entries: Vec::new(),
        }
    }

    /// Add an entry
    pub fn with(mut self, task: impl Into<String>, descriptor: TapDescriptor) -> Self {
        self.insert(task, descriptor);
        self
    }

    /// Add an entry in place
    pub fn insert(&mut self, task: impl Into<String>, descriptor: TapDescriptor) {
        self.entries.push((task.into(), descriptor));
    }

    /// Logical task names, in declaration order
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Look up a descriptor by task name
    pub fn get(&self, task: &str) -> Option<&TapDescriptor> {
        self.entries
            .iter()
            .find(|(name, _)| name == task)
            .map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind every entry onto the engine's hooks.
    ///
    /// Hook names are `<plugin>:<task>` so timings and logs identify the owner.
    pub fn apply(&self, engine: &mut Engine) {
        for (task, descriptor) in &self.entries {
            let name = format!("{}:{}", self.plugin, task);
            engine.hooks_mut().tap(
                descriptor.point(),
                name,
                descriptor.stage,
                descriptor.stats_key.clone(),
                descriptor.callback.clone(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_descriptor_builders() {
        let descriptor = TapDescriptor::sync(Phase::Make, |_| Ok(()))
            .in_compilation(SubPhase::ProcessAssets)
            .with_stage(Stage::Additional)
            .with_stats_key("docs");

        assert_eq!(descriptor.phase, Phase::ThisCompilation);
        assert_eq!(
            descriptor.point(),
            HookPoint::compilation(SubPhase::ProcessAssets)
        );
        assert_eq!(descriptor.stage, Some(Stage::Additional));
        assert!(!descriptor.is_async());

        let descriptor = TapDescriptor::future(Phase::Done, |_| async { Ok(()) });
        assert!(descriptor.is_async());
    }

    #[test]
    fn test_apply_binds_every_entry() {
        let adapter = TapAdapter::new("fingerprint")
            .with("read", TapDescriptor::future(Phase::BeforeRun, |_| async { Ok(()) }))
            .with(
                "verify",
                TapDescriptor::sync(Phase::ThisCompilation, |_| Ok(()))
                    .in_compilation(SubPhase::ProcessAssets)
                    .with_stage(Stage::Analyse),
            )
            .with("save", TapDescriptor::future(Phase::Done, |_| async { Ok(()) }));

        let mut engine = Engine::new();
        adapter.apply(&mut engine);

        assert_eq!(engine.hooks().len(), 3);
        assert_eq!(
            engine.hooks().tap_names(HookPoint::phase(Phase::BeforeRun)),
            vec!["fingerprint:read"]
        );
        assert!(engine
            .hooks()
            .has_taps(HookPoint::compilation(SubPhase::ProcessAssets)));
        assert_eq!(adapter.tasks().collect::<Vec<_>>(), vec!["read", "verify", "save"]);
    }

    #[tokio::test]
    async fn test_two_adapters_share_phase_by_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let report_log = log.clone();
        let additional_log = log.clone();

        let reporter = TapAdapter::new("reporter").with(
            "summary",
            TapDescriptor::sync(Phase::ThisCompilation, move |_| {
                report_log.lock().unwrap().push("report");
                Ok(())
            })
            .in_compilation(SubPhase::ProcessAssets)
            .with_stage(Stage::Report),
        );
        let task = TapAdapter::new("task").with(
            "run",
            TapDescriptor::sync(Phase::ThisCompilation, move |_| {
                additional_log.lock().unwrap().push("additional");
                Ok(())
            })
            .in_compilation(SubPhase::ProcessAssets)
            .with_stage(Stage::Additional),
        );

        let mut engine = Engine::new();
        reporter.apply(&mut engine);
        task.apply(&mut engine);

        let ctx = PhaseContext::new(crate::types::SubBuild::new(
            "lib",
            crate::types::BuildKind::Library,
        ));
        engine.run(&ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["additional", "report"]);
    }
}
