//! The host engine's registry of attached callbacks

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, trace};

use crate::engine::PhaseContext;
use crate::error::Result;

use super::{HookPoint, Stage};

type SyncTapFn = Arc<dyn Fn(&PhaseContext) -> Result<()> + Send + Sync>;
type AsyncTapFn = Arc<dyn Fn(PhaseContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A callback attached to a hook point
#[derive(Clone)]
pub enum TapCallback {
    /// Runs to completion inline
    Sync(SyncTapFn),
    /// Awaited before the phase is considered finished
    Async(AsyncTapFn),
}

impl TapCallback {
    /// Wrap a synchronous callback
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&PhaseContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a future-returning callback
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(PhaseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl std::fmt::Debug for TapCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("TapCallback::Sync"),
            Self::Async(_) => f.write_str("TapCallback::Async"),
        }
    }
}

#[derive(Debug, Clone)]
struct RegisteredTap {
    name: String,
    stage: Option<Stage>,
    stats_key: String,
    callback: TapCallback,
}

/// How long one tap took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapTiming {
    pub key: String,
    pub point: HookPoint,
    pub duration: Duration,
}

/// Callbacks attached per hook point, kept in execution order
#[derive(Debug, Default)]
pub struct HookSet {
    taps: HashMap<HookPoint, Vec<RegisteredTap>>,
    timings: Mutex<Vec<TapTiming>>,
}

impl HookSet {
    /// Create an empty hook set
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a callback.
    ///
    /// Untagged taps run before staged ones; equal stages keep
    /// registration order.
    pub fn tap(
        &mut self,
        point: HookPoint,
        name: impl Into<String>,
        stage: Option<Stage>,
        stats_key: Option<String>,
        callback: TapCallback,
    ) {
        let name = name.into();
        debug!(point = %point, tap = %name, stage = ?stage, is_async = callback.is_async(), "tapping hook");
        let entry = RegisteredTap {
            stats_key: stats_key.unwrap_or_else(|| name.clone()),
            name,
            stage,
            callback,
        };

        let entries = self.taps.entry(point).or_default();
        let position = entries
            .iter()
            .position(|existing| existing.stage > stage)
            .unwrap_or(entries.len());
        entries.insert(position, entry);
    }

    /// Names of the taps at a point, in execution order
    pub fn tap_names(&self, point: HookPoint) -> Vec<String> {
        self.taps
            .get(&point)
            .map(|entries| entries.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Check if anything is attached at a point
    pub fn has_taps(&self, point: HookPoint) -> bool {
        self.taps.get(&point).is_some_and(|v| !v.is_empty())
    }

    /// Total number of attached callbacks
    pub fn len(&self) -> usize {
        self.taps.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire every tap at a point.
    ///
    /// Non-fatal errors are recorded on the build's diagnostics and the
    /// remaining taps still run. A fatal error returns immediately.
    pub async fn call(&self, point: HookPoint, ctx: &PhaseContext) -> Result<()> {
        let Some(entries) = self.taps.get(&point) else {
            return Ok(());
        };

        for entry in entries {
            trace!(point = %point, tap = %entry.name, "calling tap");
            let start = Instant::now();
            let outcome = match &entry.callback {
                TapCallback::Sync(f) => f(ctx),
                TapCallback::Async(f) => f(ctx.clone()).await,
            };
            self.record_timing(&entry.stats_key, point, start.elapsed());

            if let Err(err) = outcome {
                if err.is_fatal() {
                    return Err(err);
                }
                ctx.diagnostics.push_error(&ctx.build.name, &err);
            }
        }

        Ok(())
    }

    /// Timings recorded so far, in call order
    pub fn timings(&self) -> Vec<TapTiming> {
        self.timings
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn record_timing(&self, key: &str, point: HookPoint, duration: Duration) {
        if let Ok(mut timings) = self.timings.lock() {
            timings.push(TapTiming {
                key: key.to_string(),
                point,
                duration,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;
    use crate::error::FlotillaError;
    use crate::hooks::{Phase, SubPhase};
    use crate::types::{BuildKind, SubBuild};

    fn context() -> PhaseContext {
        PhaseContext::new(SubBuild::new("lib", BuildKind::Library))
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> TapCallback {
        let log = log.clone();
        let label = label.to_string();
        TapCallback::sync(move |_| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn test_stage_ordering_within_point() {
        let point = HookPoint::compilation(SubPhase::ProcessAssets);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookSet::new();

        hooks.tap(point, "report", Some(Stage::Report), None, recorder(&log, "report"));
        hooks.tap(point, "additional-a", Some(Stage::Additional), None, recorder(&log, "a"));
        hooks.tap(point, "untagged", None, None, recorder(&log, "untagged"));
        hooks.tap(point, "additional-b", Some(Stage::Additional), None, recorder(&log, "b"));
        hooks.tap(point, "pre", Some(Stage::PreProcess), None, recorder(&log, "pre"));

        assert_eq!(
            hooks.tap_names(point),
            vec!["untagged", "pre", "additional-a", "additional-b", "report"]
        );
    }

    #[tokio::test]
    async fn test_async_tap_completes_before_call_returns() {
        let point = HookPoint::phase(Phase::BeforeRun);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookSet::new();

        let async_log = log.clone();
        hooks.tap(
            point,
            "slow",
            None,
            None,
            TapCallback::future(move |_| {
                let log = async_log.clone();
                async move {
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push("slow".to_string());
                    Ok(())
                }
            }),
        );
        hooks.tap(point, "after", None, None, recorder(&log, "after"));

        hooks.call(point, &context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["slow", "after"]);
    }

    #[tokio::test]
    async fn test_non_fatal_error_recorded_and_next_tap_runs() {
        let point = HookPoint::phase(Phase::Emit);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookSet::new();
        hooks.tap(
            point,
            "failing",
            None,
            None,
            TapCallback::sync(|_| Err(FlotillaError::other("boom"))),
        );
        hooks.tap(point, "next", None, None, recorder(&log, "next"));

        let ctx = context();
        hooks.call(point, &ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["next"]);
        let entries = ctx.diagnostics.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].code, DiagnosticCode::HandlerFailure);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_point() {
        let point = HookPoint::phase(Phase::Emit);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookSet::new();
        hooks.tap(
            point,
            "abstract",
            None,
            None,
            TapCallback::sync(|_| Err(FlotillaError::internal("Plugin::run"))),
        );
        hooks.tap(point, "next", None, None, recorder(&log, "next"));

        let result = hooks.call(point, &context()).await;
        assert!(matches!(result, Err(FlotillaError::Internal { .. })));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timings_use_stats_key() {
        let point = HookPoint::phase(Phase::Done);
        let mut hooks = HookSet::new();
        hooks.tap(
            point,
            "save",
            None,
            Some("fingerprint".to_string()),
            TapCallback::sync(|_| Ok(())),
        );
        hooks.tap(point, "emit", None, None, TapCallback::sync(|_| Ok(())));

        hooks.call(point, &context()).await.unwrap();
        let keys: Vec<String> = hooks.timings().into_iter().map(|t| t.key).collect();
        assert_eq!(keys, vec!["fingerprint", "emit"]);
    }
}
