//! Flotilla Core - Core library for multi-target build orchestration
//!
//! This crate provides the foundational types, error handling, configuration,
//! the host engine surface, and the coordination primitives shared by every
//! sub-build in a run: the event and wait coordinator, the tap adapter, and
//! the fingerprint rotator.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod hooks;
pub mod plugins;
pub mod types;

pub use cache::{CacheStats, FileCache, KeyValueCache, MemoryCache};
pub use coordinator::{
    Coordinator, EmittedEvent, EventStage, Subscription, WaitCallback, WaitOutcome,
    WaitRegistration,
};
pub use diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Severity};
pub use engine::{Artifact, Compilation, Engine, PhaseContext};
pub use error::{CacheError, ConfigError, FlotillaError, PluginError, Result};
pub use fingerprint::{FingerprintFactory, FingerprintPlugin, FingerprintRotator, FingerprintState};
pub use hooks::{
    HookPoint, HookSet, Phase, Stage, SubPhase, TapAdapter, TapCallback, TapDescriptor, TapTiming,
};
pub use plugins::{instantiate, FactoryContext, Guard, Instantiated, Plugin, PluginFactory, PluginSet};
pub use types::{done_event_name, BuildKind, SubBuild, WaitSpec, DEFAULT_WAIT_TIMEOUT_MS};
