//! Host engine surface
//!
//! The compiler engine that actually produces outputs is an external
//! collaborator. This module carries just enough of it to drive plugins:
//! a compilation holding named output artifacts, the context handed to
//! every callback, and a runner that fires the hook points in order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::hooks::{HookPoint, HookSet, Phase};
use crate::types::SubBuild;

/// A named output produced during a compilation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Artifact {
    pub content: Vec<u8>,
    /// Content hash, once known
    pub hash: Option<String>,
    pub info: BTreeMap<String, String>,
}

impl Artifact {
    /// Create an artifact without a hash
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            hash: None,
            info: BTreeMap::new(),
        }
    }

    /// Create an artifact and hash its content
    pub fn hashed(content: impl Into<Vec<u8>>) -> Self {
        let mut artifact = Self::new(content);
        artifact.hash = Some(artifact.hash_content());
        artifact
    }

    /// SHA-256 of the content
    pub fn hash_content(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.content);
        format!("{:x}", hasher.finalize())
    }

    /// Set an explicit hash
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Add a metadata entry
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }
}

/// Shared handle to the output set of one compilation
#[derive(Debug, Clone, Default)]
pub struct Compilation {
    artifacts: Arc<Mutex<BTreeMap<String, Artifact>>>,
}

impl Compilation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an artifact, returning the previous one
    pub fn add(&self, name: impl Into<String>, artifact: Artifact) -> Option<Artifact> {
        self.lock().insert(name.into(), artifact)
    }

    /// Get a copy of an artifact
    pub fn get(&self, name: &str) -> Option<Artifact> {
        self.lock().get(name).cloned()
    }

    /// Remove an artifact
    pub fn delete(&self, name: &str) -> Option<Artifact> {
        self.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Artifact names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// `(name, hash)` for every artifact whose hash is known
    pub fn hashes(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .filter_map(|(name, a)| a.hash.clone().map(|h| (name.clone(), h)))
            .collect()
    }

    /// Update an artifact's metadata in place
    pub fn set_info(&self, name: &str, key: impl Into<String>, value: impl Into<String>) -> bool {
        match self.lock().get_mut(name) {
            Some(artifact) => {
                artifact.info.insert(key.into(), value.into());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Artifact>> {
        self.artifacts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything a callback can reach while a sub-build runs
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub build: Arc<SubBuild>,
    pub compilation: Compilation,
    pub diagnostics: Diagnostics,
}

impl PhaseContext {
    /// Create a context with an empty compilation and message list
    pub fn new(build: SubBuild) -> Self {
        Self {
            build: Arc::new(build),
            compilation: Compilation::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Use an existing diagnostics list
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Drives one sub-build through every hook point
#[derive(Debug, Default)]
pub struct Engine {
    hooks: HookSet,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookSet {
        &mut self.hooks
    }

    /// Fire all hook points in order.
    ///
    /// A fatal error stops the sequence, but `shutdown` always fires so
    /// plugins can clean up.
    pub async fn run(&self, ctx: &PhaseContext) -> Result<()> {
        info!(build = %ctx.build.name, taps = self.hooks.len(), "running build");
        let shutdown = HookPoint::phase(Phase::Shutdown);

        let mut outcome = Ok(());
        for point in HookPoint::sequence() {
            if point == shutdown {
                continue;
            }
            debug!(build = %ctx.build.name, point = %point, "entering phase");
            if let Err(err) = self.hooks.call(point, ctx).await {
                outcome = Err(err);
                break;
            }
        }

        let cleanup = self.hooks.call(shutdown, ctx).await;
        outcome.and(cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlotillaError;
    use crate::hooks::{SubPhase, TapCallback};
    use crate::types::BuildKind;

    fn context() -> PhaseContext {
        PhaseContext::new(SubBuild::new("lib", BuildKind::Library))
    }

    #[test]
    fn test_compilation_add_get_delete() {
        let compilation = Compilation::new();
        assert!(compilation.add("main.js", Artifact::hashed("console.log(1)")).is_none());
        assert!(compilation.contains("main.js"));
        assert_eq!(compilation.hashes().len(), 1);

        compilation.add("readme.txt", Artifact::new("hello"));
        assert_eq!(compilation.names(), vec!["main.js", "readme.txt"]);
        assert_eq!(compilation.hashes().len(), 1);

        assert!(compilation.set_info("readme.txt", "changed", "true"));
        assert_eq!(
            compilation.get("readme.txt").unwrap().info.get("changed"),
            Some(&"true".to_string())
        );

        assert!(compilation.delete("main.js").is_some());
        assert!(compilation.get("main.js").is_none());
    }

    #[test]
    fn test_hash_is_content_addressed() {
        assert_eq!(
            Artifact::hashed("same").hash,
            Artifact::hashed("same").hash
        );
        assert_ne!(
            Artifact::hashed("one").hash,
            Artifact::hashed("two").hash
        );
    }

    #[tokio::test]
    async fn test_run_fires_points_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();

        for point in HookPoint::sequence().into_iter().rev() {
            let log = log.clone();
            engine.hooks_mut().tap(
                point,
                point.to_string(),
                None,
                None,
                TapCallback::sync(move |_| {
                    log.lock().unwrap().push(point);
                    Ok(())
                }),
            );
        }

        engine.run(&context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), HookPoint::sequence());
    }

    #[tokio::test]
    async fn test_shutdown_runs_after_fatal_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();

        engine.hooks_mut().tap(
            HookPoint::compilation(SubPhase::ProcessAssets),
            "broken",
            None,
            None,
            TapCallback::sync(|_| Err(FlotillaError::internal("TaskHandler::run"))),
        );
        for phase in [Phase::Emit, Phase::Shutdown] {
            let log = log.clone();
            engine.hooks_mut().tap(
                HookPoint::phase(phase),
                phase.as_str(),
                None,
                None,
                TapCallback::sync(move |_| {
                    log.lock().unwrap().push(phase);
                    Ok(())
                }),
            );
        }

        let result = engine.run(&context()).await;
        assert!(matches!(result, Err(FlotillaError::Internal { .. })));
        assert_eq!(*log.lock().unwrap(), vec![Phase::Shutdown]);
    }
}
