//! Hook System - lifecycle phases plugins attach to
//!
//! A sub-build runs through a fixed sequence of phases:
//! - environment: Plugins are being applied
//! - before-run: Before any work starts (cache reads, cross-build waits)
//! - this-compilation: A compilation object exists; nested per-compilation
//!   sub-phases (process-assets, after-process-assets) fire inside it
//! - make: Inputs are being produced
//! - emit: Outputs are about to be written
//! - after-emit: Outputs were written
//! - done: The build finished
//! - shutdown: Cleanup, always fired even after a fatal error
//!
//! Taps registered on the same phase are ordered by [`Stage`], then by
//! registration order.

mod set;
mod tap;

pub use set::{HookSet, TapCallback, TapTiming};
pub use tap::{TapAdapter, TapDescriptor};

use serde::{Deserialize, Serialize};

/// Compiler-level lifecycle phases, in firing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Environment,
    BeforeRun,
    ThisCompilation,
    Make,
    Emit,
    AfterEmit,
    Done,
    Shutdown,
}

impl Phase {
    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::BeforeRun => "before-run",
            Self::ThisCompilation => "this-compilation",
            Self::Make => "make",
            Self::Emit => "emit",
            Self::AfterEmit => "after-emit",
            Self::Done => "done",
            Self::Shutdown => "shutdown",
        }
    }

    /// Parse phase from string
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.as_str() == s)
    }

    /// Get all phases in order
    pub fn all() -> &'static [Phase] {
        &[
            Self::Environment,
            Self::BeforeRun,
            Self::ThisCompilation,
            Self::Make,
            Self::Emit,
            Self::AfterEmit,
            Self::Done,
            Self::Shutdown,
        ]
    }
}

/// Nested per-compilation phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubPhase {
    ProcessAssets,
    AfterProcessAssets,
}

impl SubPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessAssets => "process-assets",
            Self::AfterProcessAssets => "after-process-assets",
        }
    }

    pub fn all() -> &'static [SubPhase] {
        &[Self::ProcessAssets, Self::AfterProcessAssets]
    }
}

/// Ordering key for taps sharing a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    PreProcess,
    Additional,
    Additions,
    Optimize,
    Derived,
    Analyse,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreProcess => "pre-process",
            Self::Additional => "additional",
            Self::Additions => "additions",
            Self::Optimize => "optimize",
            Self::Derived => "derived",
            Self::Analyse => "analyse",
            Self::Report => "report",
        }
    }
}

/// A point in the lifecycle a callback can attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookPoint {
    pub phase: Phase,
    pub sub_phase: Option<SubPhase>,
}

impl HookPoint {
    /// Compiler-level point
    pub const fn phase(phase: Phase) -> Self {
        Self {
            phase,
            sub_phase: None,
        }
    }

    /// Nested per-compilation point
    pub const fn compilation(sub_phase: SubPhase) -> Self {
        Self {
            phase: Phase::ThisCompilation,
            sub_phase: Some(sub_phase),
        }
    }

    /// Every point in firing order. Nested points fire after `make`.
    pub fn sequence() -> Vec<HookPoint> {
        let mut points = Vec::new();
        for phase in Phase::all() {
            points.push(Self::phase(*phase));
            if *phase == Phase::Make {
                points.extend(SubPhase::all().iter().map(|s| Self::compilation(*s)));
            }
        }
        points
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sub_phase {
            Some(sub) => write!(f, "{}/{}", self.phase.as_str(), sub.as_str()),
            None => f.write_str(self.phase.as_str()),
        }
    }
}
