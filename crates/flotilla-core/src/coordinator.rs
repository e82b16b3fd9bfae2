//! Cross-build event and wait coordination
//!
//! One [`Coordinator`] is owned by the orchestrator for the duration of a run
//! and cloned into every plugin that needs it. It tracks which builds have
//! finished (the done-set), holds callbacks waiting on a build to finish,
//! and exposes one broadcast topic per event name.
//!
//! Waiting is advisory. [`Coordinator::wait_for`] always resolves, either
//! when the awaited build announces completion or when its timeout elapses.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::types::{SubBuild, WaitSpec, DEFAULT_WAIT_TIMEOUT_MS};

/// Capacity of each event topic
const TOPIC_CAPACITY: usize = 16;

/// Lifecycle stage carried by an emitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStage {
    Started,
    Done,
    Failed,
}

impl EventStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// An event as recorded and broadcast by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub name: String,
    pub source: String,
    pub stage: EventStage,
    pub at: DateTime<Utc>,
}

/// Callback fired when the awaited name is marked done
pub enum WaitCallback {
    Sync(Box<dyn FnOnce(&[Value]) -> Option<Value> + Send>),
    Future(Box<dyn FnOnce(Vec<Value>) -> BoxFuture<'static, Option<Value>> + Send>),
}

impl WaitCallback {
    /// Wrap a synchronous callback
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce(&[Value]) -> Option<Value> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// Wrap a future-returning callback
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> Fut + Send + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        Self::Future(Box::new(move |args| f(args).boxed()))
    }

    async fn invoke(self, args: Vec<Value>) -> Option<Value> {
        match self {
            Self::Sync(f) => f(&args),
            Self::Future(f) => f(args).await,
        }
    }
}

impl fmt::Debug for WaitCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("WaitCallback::Sync"),
            Self::Future(_) => f.write_str("WaitCallback::Future"),
        }
    }
}

/// A callback waiting for a name to be marked done.
///
/// The callback is consumed when it fires, so it can fire at most once.
#[derive(Debug)]
pub struct WaitRegistration {
    /// Name whose completion triggers the callback
    pub target: String,
    /// Identifier of the waiter
    pub source: String,
    pub timeout_ms: u64,
    callback: WaitCallback,
}

impl WaitRegistration {
    pub fn new(target: impl Into<String>, source: impl Into<String>, callback: WaitCallback) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            callback,
        }
    }

    /// Create a registration from a configured wait spec
    pub fn from_spec(spec: &WaitSpec, callback: WaitCallback) -> Self {
        Self::new(&spec.target, &spec.source, callback).with_timeout_ms(spec.timeout_ms)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Insertion-ordered set of names that signaled completion
#[derive(Debug, Default)]
struct DoneSet {
    order: Vec<String>,
    args: HashMap<String, Vec<Value>>,
}

impl DoneSet {
    /// Returns false when the name was already present
    fn insert(&mut self, name: &str, args: Vec<Value>) -> bool {
        if self.args.contains_key(name) {
            return false;
        }
        self.order.push(name.to_string());
        self.args.insert(name.to_string(), args);
        true
    }

    fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    fn args(&self, name: &str) -> Vec<Value> {
        self.args.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    done: DoneSet,
    registrations: Vec<WaitRegistration>,
    history: Vec<EmittedEvent>,
    active_builds: HashSet<String>,
    topics: HashMap<String, broadcast::Sender<EmittedEvent>>,
}

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nothing to wait for
    Skipped,
    /// The awaited build announced completion
    Completed,
    /// The timeout elapsed first
    TimedOut,
}

/// Receiving end of one event topic
#[derive(Debug)]
pub struct Subscription {
    event: String,
    receiver: broadcast::Receiver<EmittedEvent>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Wait for the next event on this topic
    pub async fn next(&mut self) -> Option<EmittedEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(event = %self.event, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Run-scoped done-tracking and bounded-wait primitive
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which builds take part in this run
    pub fn set_active_builds<I, S>(&self, builds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock();
        state.active_builds = builds.into_iter().map(Into::into).collect();
    }

    pub fn is_active(&self, build: &str) -> bool {
        self.lock().active_builds.contains(build)
    }

    /// Open a receiver on an event topic
    pub fn subscribe(&self, event: &str) -> Subscription {
        let mut state = self.lock();
        let sender = state
            .topics
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Subscription {
            event: event.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Close a receiver, dropping the topic once nobody listens
    pub fn unsubscribe(&self, subscription: Subscription) {
        let Subscription { event, receiver } = subscription;
        drop(receiver);
        let mut state = self.lock();
        if state
            .topics
            .get(&event)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            state.topics.remove(&event);
        }
    }

    /// Record an event and forward it to the topic's subscribers.
    ///
    /// Emitting never touches the done-set; completion is recorded only by
    /// [`Coordinator::mark_done`]. Returns the number of receivers reached.
    pub fn emit(&self, event: &str, source: &str, stage: EventStage) -> usize {
        let emitted = EmittedEvent {
            name: event.to_string(),
            source: source.to_string(),
            stage,
            at: Utc::now(),
        };

        let mut state = self.lock();
        state.history.push(emitted.clone());
        let delivered = state
            .topics
            .get(event)
            .map(|sender| sender.send(emitted).unwrap_or(0))
            .unwrap_or(0);

        info!(event, source, stage = stage.as_str(), delivered, "event emitted");
        delivered
    }

    /// Whether an event with this name has been emitted in this run
    pub fn has_emitted(&self, event: &str) -> bool {
        self.lock().history.iter().any(|e| e.name == event)
    }

    /// Every emitted event, oldest first
    pub fn history(&self) -> Vec<EmittedEvent> {
        self.lock().history.clone()
    }

    /// Mark a name as done and fire every callback waiting on it.
    ///
    /// Marking an existing name again is a no-op for the done-set; only
    /// registrations added since then can fire. Returns the last callback
    /// result that was `Some`.
    pub async fn mark_done(&self, source: &str, args: Vec<Value>) -> Option<Value> {
        let ready = {
            let mut state = self.lock();
            if state.done.insert(source, args) {
                info!(source, "marked done");
            } else {
                debug!(source, "already marked done");
            }

            let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.registrations)
                .into_iter()
                .partition(|r| r.target == source);
            state.registrations = pending;
            ready
        };

        let args = self.lock().done.args(source);
        let mut last = None;
        for registration in ready {
            debug!(awaited = %registration.target, waiter = %registration.source, "firing wait callback");
            if let Some(result) = registration.callback.invoke(args.clone()).await {
                last = Some(result);
            }
        }
        last
    }

    /// Add a registration.
    ///
    /// If its target is already done the callback fires immediately instead
    /// of being stored, so a late registration is never stranded.
    pub async fn register(&self, registration: WaitRegistration) -> Option<Value> {
        let args = {
            let mut state = self.lock();
            if !state.done.contains(&registration.target) {
                debug!(awaited = %registration.target, waiter = %registration.source, "registered wait");
                state.registrations.push(registration);
                return None;
            }
            state.done.args(&registration.target)
        };

        debug!(awaited = %registration.target, waiter = %registration.source, "target already done, replaying");
        registration.callback.invoke(args).await
    }

    /// Whether a name is in the done-set
    pub fn is_done(&self, name: &str) -> bool {
        self.lock().done.contains(name)
    }

    /// Names in the done-set, in the order they completed
    pub fn done_names(&self) -> Vec<String> {
        self.lock().done.order.clone()
    }

    /// Number of registrations still waiting
    pub fn pending_registrations(&self) -> usize {
        self.lock().registrations.len()
    }

    /// Wait, within the configured bound, for the build this one depends on.
    ///
    /// Resolves immediately when the build runs alone, has no wait spec, or
    /// its target is not part of this run. Never fails: the timeout wins if
    /// the target never reports back, and the target keeps running.
    pub async fn wait_for(&self, build: &SubBuild) -> WaitOutcome {
        let Some(spec) = build.wait.as_ref() else {
            return WaitOutcome::Skipped;
        };
        if build.sole_build_in_run {
            debug!(build = %build.name, "sole build in run, not waiting");
            return WaitOutcome::Skipped;
        }
        if !self.is_active(&spec.target) {
            debug!(build = %build.name, awaited = %spec.target, "wait target not active, not waiting");
            return WaitOutcome::Skipped;
        }

        let event = spec.done_event();
        // Subscribe before checking history so an emission in between is not lost.
        let mut subscription = self.subscribe(&event);
        if self.has_emitted(&event) || self.is_done(&spec.target) {
            self.unsubscribe(subscription);
            return WaitOutcome::Completed;
        }

        info!(build = %build.name, awaited = %spec.target, timeout_ms = spec.timeout_ms, "waiting for build");
        let outcome = tokio::select! {
            received = subscription.next() => match received {
                Some(_) => WaitOutcome::Completed,
                None => {
                    tokio::time::sleep(spec.timeout()).await;
                    WaitOutcome::TimedOut
                }
            },
            _ = tokio::time::sleep(spec.timeout()) => WaitOutcome::TimedOut,
        };
        self.unsubscribe(subscription);

        match outcome {
            WaitOutcome::TimedOut => warn!(
                build = %build.name,
                awaited = %spec.target,
                timeout_ms = spec.timeout_ms,
                "timed out waiting for build, continuing"
            ),
            _ => info!(build = %build.name, awaited = %spec.target, "wait satisfied"),
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::types::BuildKind;

    fn counting(counter: &Arc<AtomicUsize>) -> WaitCallback {
        let counter = counter.clone();
        WaitCallback::sync(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })
    }

    fn waiting_build(target: &str, timeout_ms: u64) -> SubBuild {
        SubBuild::new("docs", BuildKind::Documentation)
            .with_wait(WaitSpec::new(target, "docs").with_timeout_ms(timeout_ms))
    }

    #[tokio::test]
    async fn test_mark_done_fires_every_registration_once() {
        let coordinator = Coordinator::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        coordinator
            .register(WaitRegistration::new("b", "p1", counting(&first)))
            .await;
        coordinator
            .register(WaitRegistration::new("b", "p2", counting(&second)))
            .await;
        assert_eq!(coordinator.pending_registrations(), 2);

        coordinator.mark_done("b", Vec::new()).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_registrations(), 0);

        coordinator.mark_done("b", Vec::new()).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_after_done_replays_once() {
        let coordinator = Coordinator::new();
        let fired = Arc::new(AtomicUsize::new(0));

        coordinator.mark_done("lib", vec![Value::from("ok")]).await;

        let counter = fired.clone();
        let result = coordinator
            .register(WaitRegistration::new(
                "lib",
                "docs",
                WaitCallback::sync(move |args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    args.first().cloned()
                }),
            ))
            .await;

        assert_eq!(result, Some(Value::from("ok")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_registrations(), 0);

        coordinator.mark_done("lib", Vec::new()).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registrations_for_other_targets_stay_pending() {
        let coordinator = Coordinator::new();
        let fired = Arc::new(AtomicUsize::new(0));

        coordinator
            .register(WaitRegistration::new("types", "docs", counting(&fired)))
            .await;
        coordinator.mark_done("lib", Vec::new()).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.pending_registrations(), 1);
    }

    #[tokio::test]
    async fn test_mark_done_returns_last_result() {
        let coordinator = Coordinator::new();
        coordinator
            .register(WaitRegistration::new(
                "lib",
                "a",
                WaitCallback::sync(|_| Some(Value::from(1))),
            ))
            .await;
        coordinator
            .register(WaitRegistration::new(
                "lib",
                "b",
                WaitCallback::future(|_| async { Some(Value::from(2)) }),
            ))
            .await;
        coordinator
            .register(WaitRegistration::new("lib", "c", WaitCallback::sync(|_| None)))
            .await;

        let result = coordinator.mark_done("lib", Vec::new()).await;
        assert_eq!(result, Some(Value::from(2)));
    }

    #[tokio::test]
    async fn test_done_set_is_idempotent_and_ordered() {
        let coordinator = Coordinator::new();
        coordinator.mark_done("types", Vec::new()).await;
        coordinator.mark_done("lib", Vec::new()).await;
        coordinator.mark_done("types", Vec::new()).await;

        assert_eq!(coordinator.done_names(), vec!["types", "lib"]);
    }

    #[tokio::test]
    async fn test_emit_does_not_mark_done() {
        let coordinator = Coordinator::new();
        coordinator.emit("lib_done", "lib", EventStage::Done);

        assert!(coordinator.has_emitted("lib_done"));
        assert!(!coordinator.is_done("lib"));
        assert!(coordinator.done_names().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_receives_and_unsubscribe_prunes() {
        let coordinator = Coordinator::new();
        let mut subscription = coordinator.subscribe("lib_done");

        assert_eq!(coordinator.emit("lib_done", "lib", EventStage::Done), 1);
        let event = subscription.next().await.unwrap();
        assert_eq!(event.source, "lib");
        assert_eq!(event.stage, EventStage::Done);

        coordinator.unsubscribe(subscription);
        assert_eq!(coordinator.emit("lib_done", "lib", EventStage::Done), 0);
        assert_eq!(coordinator.history().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_skips_without_spec_or_active_target() {
        let coordinator = Coordinator::new();
        coordinator.set_active_builds(["docs"]);

        let plain = SubBuild::new("docs", BuildKind::Documentation);
        assert_eq!(coordinator.wait_for(&plain).await, WaitOutcome::Skipped);

        let absent_target = waiting_build("lib", 30_000);
        assert_eq!(coordinator.wait_for(&absent_target).await, WaitOutcome::Skipped);

        coordinator.set_active_builds(["docs", "lib"]);
        let sole = waiting_build("lib", 30_000).with_sole_build(true);
        assert_eq!(coordinator.wait_for(&sole).await, WaitOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_wait_for_times_out_promptly() {
        let coordinator = Coordinator::new();
        coordinator.set_active_builds(["docs", "lib"]);

        let start = Instant::now();
        let outcome = coordinator.wait_for(&waiting_build("lib", 50)).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_honours_default_timeout() {
        let coordinator = Coordinator::new();
        coordinator.set_active_builds(["docs", "lib"]);
        let build = SubBuild::new("docs", BuildKind::Documentation)
            .with_wait(WaitSpec::new("lib", "docs"));

        let start = tokio::time::Instant::now();
        let outcome = coordinator.wait_for(&build).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_wait_for_completes_on_emission() {
        let coordinator = Coordinator::new();
        coordinator.set_active_builds(["docs", "lib"]);

        let emitter = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            emitter.emit("lib_done", "lib", EventStage::Done);
        });

        let outcome = coordinator.wait_for(&waiting_build("lib", 5_000)).await;
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn test_wait_for_completes_when_already_emitted() {
        let coordinator = Coordinator::new();
        coordinator.set_active_builds(["docs", "lib"]);
        coordinator.emit("lib_done", "lib", EventStage::Done);

        let outcome = coordinator.wait_for(&waiting_build("lib", 5_000)).await;
        assert_eq!(outcome, WaitOutcome::Completed);
    }
}
