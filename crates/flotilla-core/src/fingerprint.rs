//! Three-generation content fingerprints for incremental builds
//!
//! Each sub-build keeps a map of output unit to content hash in three
//! generations:
//! - `previous`: the last fully confirmed state
//! - `current`: this run's view, revised as real hashes become known
//! - `next`: hashes observed during this run, promoted by the next `read`
//!
//! The generations only ever move together through [`FingerprintState::rotate`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::KeyValueCache;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::engine::{Engine, PhaseContext};
use crate::error::{CacheError, Result};
use crate::hooks::{Phase, Stage, SubPhase, TapAdapter, TapDescriptor};
use crate::plugins::{FactoryContext, Guard, Plugin, PluginFactory};

/// Metadata key set on artifacts whose hash changed this run
pub const CHANGED_INFO_KEY: &str = "changed";

/// Unit to hash, per generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintState {
    pub previous: BTreeMap<String, String>,
    pub current: BTreeMap<String, String>,
    pub next: BTreeMap<String, String>,
}

impl FingerprintState {
    /// Advance all generations: `previous <- current <- next <- {}`
    pub fn rotate(&mut self) {
        self.previous = std::mem::take(&mut self.current);
        self.current = std::mem::take(&mut self.next);
    }

    /// Compare a real hash against `current`, adopting it when it differs.
    /// Returns true when the unit changed.
    pub fn verify(&mut self, unit: &str, hash: &str) -> bool {
        if self.current.get(unit).map(String::as_str) == Some(hash) {
            return false;
        }
        self.current.insert(unit.to_string(), hash.to_string());
        true
    }

    /// Record a hash for the next run; a cold `current` is seeded too
    pub fn update(&mut self, unit: &str, hash: &str) {
        self.next.insert(unit.to_string(), hash.to_string());
        self.current
            .entry(unit.to_string())
            .or_insert_with(|| hash.to_string());
    }

    /// Whether `current` differs from the last confirmed generation
    pub fn changed_since_confirmed(&self, unit: &str) -> bool {
        self.current.get(unit) != self.previous.get(unit)
    }
}

#[derive(Debug, Default)]
struct RotatorState {
    fingerprints: FingerprintState,
    changed: BTreeSet<String>,
    read: bool,
}

/// Owns one sub-build's fingerprint state and its persistence
pub struct FingerprintRotator {
    build: String,
    cache: Arc<dyn KeyValueCache>,
    state: Mutex<RotatorState>,
}

impl FingerprintRotator {
    pub fn new(build: impl Into<String>, cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            build: build.into(),
            cache,
            state: Mutex::new(RotatorState::default()),
        }
    }

    /// Key the state is persisted under
    pub fn cache_key(&self) -> String {
        format!("fingerprints/{}", self.build)
    }

    /// Load persisted state and rotate it. Only the first call per run
    /// has any effect.
    pub fn read(&self) -> std::result::Result<(), CacheError> {
        let mut state = self.lock();
        if state.read {
            debug!(build = %self.build, "fingerprints already read this run");
            return Ok(());
        }

        let key = self.cache_key();
        let mut fingerprints = match self.cache.get(&key)? {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| CacheError::Malformed {
                    key: key.clone(),
                    message: e.to_string(),
                })?
            }
            None => FingerprintState::default(),
        };
        fingerprints.rotate();

        debug!(
            build = %self.build,
            previous = fingerprints.previous.len(),
            current = fingerprints.current.len(),
            "fingerprints read"
        );
        state.fingerprints = fingerprints;
        state.read = true;
        Ok(())
    }

    /// Compare a real hash with `current`; returns true when the unit changed
    pub fn verify(&self, unit: &str, hash: &str) -> bool {
        let mut state = self.lock();
        let changed = state.fingerprints.verify(unit, hash);
        if changed {
            debug!(build = %self.build, unit, "unit changed");
            state.changed.insert(unit.to_string());
        }
        changed
    }

    /// Record a unit's hash for the next run
    pub fn update(&self, unit: &str, hash: &str) {
        self.lock().fingerprints.update(unit, hash);
    }

    /// Persist all three generations
    pub fn save(&self) -> std::result::Result<(), CacheError> {
        let value = serde_json::to_value(&self.lock().fingerprints)?;
        self.cache.set(&self.cache_key(), value)?;
        self.cache.save()?;
        debug!(build = %self.build, "fingerprints saved");
        Ok(())
    }

    /// Snapshot of the current state
    pub fn state(&self) -> FingerprintState {
        self.lock().fingerprints.clone()
    }

    /// Units flagged by `verify` during this run
    pub fn changed_units(&self) -> Vec<String> {
        self.lock().changed.iter().cloned().collect()
    }

    /// Whether a unit differs from the last confirmed run
    pub fn changed_since_confirmed(&self, unit: &str) -> bool {
        self.lock().fingerprints.changed_since_confirmed(unit)
    }

    fn lock(&self) -> MutexGuard<'_, RotatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for FingerprintRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintRotator")
            .field("build", &self.build)
            .finish()
    }
}

fn cache_warning(ctx: &PhaseContext, action: &str, err: &CacheError) {
    ctx.diagnostics.push(Diagnostic::warning(
        DiagnosticCode::CacheFailure,
        &ctx.build.name,
        format!("could not {} fingerprints: {}", action, err),
    ));
}

/// Binds a [`FingerprintRotator`] to the build lifecycle
pub struct FingerprintPlugin {
    rotator: Arc<FingerprintRotator>,
    taps: TapAdapter,
}

impl FingerprintPlugin {
    pub const NAME: &'static str = "fingerprint";

    pub fn new(rotator: Arc<FingerprintRotator>) -> Self {
        let read = rotator.clone();
        let verify = rotator.clone();
        let update = rotator.clone();
        let save = rotator.clone();

        let taps = TapAdapter::new(Self::NAME)
            .with(
                "read",
                TapDescriptor::future(Phase::BeforeRun, move |ctx| {
                    let rotator = read.clone();
                    async move {
                        if let Err(err) = rotator.read() {
                            cache_warning(&ctx, "read", &err);
                        }
                        Ok(())
                    }
                })
                .with_stats_key(Self::NAME),
            )
            .with(
                "update",
                TapDescriptor::sync(Phase::ThisCompilation, move |ctx| {
                    for (unit, hash) in ctx.compilation.hashes() {
                        update.update(&unit, &hash);
                    }
                    Ok(())
                })
                .in_compilation(SubPhase::ProcessAssets)
                .with_stage(Stage::Derived)
                .with_stats_key(Self::NAME),
            )
            .with(
                "verify",
                TapDescriptor::sync(Phase::ThisCompilation, move |ctx| {
                    for (unit, hash) in ctx.compilation.hashes() {
                        if verify.verify(&unit, &hash) {
                            ctx.compilation.set_info(&unit, CHANGED_INFO_KEY, "true");
                        }
                    }
                    Ok(())
                })
                .in_compilation(SubPhase::AfterProcessAssets)
                .with_stats_key(Self::NAME),
            )
            .with(
                "save",
                TapDescriptor::future(Phase::Done, move |ctx| {
                    let rotator = save.clone();
                    async move {
                        match rotator.save() {
                            Ok(()) => info!(
                                build = %ctx.build.name,
                                changed = rotator.changed_units().len(),
                                "fingerprints persisted"
                            ),
                            Err(err) => cache_warning(&ctx, "save", &err),
                        }
                        Ok(())
                    }
                })
                .with_stats_key(Self::NAME),
            );

        Self { rotator, taps }
    }

    pub fn rotator(&self) -> &Arc<FingerprintRotator> {
        &self.rotator
    }
}

impl Plugin for FingerprintPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, engine: &mut Engine) {
        self.taps.apply(engine);
    }
}

/// Builds a [`FingerprintPlugin`] whenever a cache is configured
#[derive(Debug, Default)]
pub struct FingerprintFactory;

impl PluginFactory for FingerprintFactory {
    fn name(&self) -> &str {
        FingerprintPlugin::NAME
    }

    fn guard(&self, ctx: &FactoryContext<'_>) -> Guard {
        if ctx.cache.is_some() {
            Guard::Pass
        } else {
            Guard::skip("caching disabled")
        }
    }

    fn create(&self, ctx: &FactoryContext<'_>) -> Result<Box<dyn Plugin>> {
        let cache = ctx
            .cache
            .clone()
            .ok_or_else(|| crate::error::FlotillaError::internal("FingerprintFactory::create without cache"))?;
        let rotator = Arc::new(FingerprintRotator::new(&ctx.build.name, cache));
        Ok(Box::new(FingerprintPlugin::new(rotator)))
    }
}
