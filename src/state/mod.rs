//! Run phase state machine
//!
//! Phases: INIT → RESOLVE_TARGET → BUILD_ARGUMENTS → START_CAPTURE → LAUNCH
//! → SUPERVISE → RECONCILE → CLEANUP → TERMINAL
//!
//! Any phase before LAUNCH may abort straight to TERMINAL. Once something has
//! been launched the run always passes through RECONCILE and CLEANUP.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Init,
    ResolveTarget,
    BuildArguments,
    /// Listener, crash snapshot and log captures are being started
    StartCapture,
    Launch,
    /// Waiting on the launched process
    Supervise,
    Reconcile,
    Cleanup,
    Terminal,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        *self == RunPhase::Terminal
    }

    /// Nothing has been started that needs tearing down.
    pub fn is_pre_launch(&self) -> bool {
        matches!(
            self,
            RunPhase::Init | RunPhase::ResolveTarget | RunPhase::BuildArguments
        )
    }

    /// Check if transition from this phase to target is valid
    pub fn can_transition_to(&self, target: RunPhase) -> bool {
        match (self, target) {
            (RunPhase::Init, RunPhase::ResolveTarget) => true,
            (RunPhase::ResolveTarget, RunPhase::BuildArguments) => true,
            (RunPhase::BuildArguments, RunPhase::StartCapture) => true,
            (RunPhase::StartCapture, RunPhase::Launch) => true,
            (RunPhase::Launch, RunPhase::Supervise) => true,
            (RunPhase::Supervise, RunPhase::Reconcile) => true,
            (RunPhase::Reconcile, RunPhase::Cleanup) => true,
            (RunPhase::Cleanup, RunPhase::Terminal) => true,

            // Abort before anything was started
            (from, RunPhase::Terminal) if from.is_pre_launch() => true,

            // Capture or launch failed; still reconcile what we have
            (RunPhase::StartCapture, RunPhase::Reconcile) => true,
            (RunPhase::Launch, RunPhase::Reconcile) => true,

            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "INIT",
            RunPhase::ResolveTarget => "RESOLVE_TARGET",
            RunPhase::BuildArguments => "BUILD_ARGUMENTS",
            RunPhase::StartCapture => "START_CAPTURE",
            RunPhase::Launch => "LAUNCH",
            RunPhase::Supervise => "SUPERVISE",
            RunPhase::Reconcile => "RECONCILE",
            RunPhase::Cleanup => "CLEANUP",
            RunPhase::Terminal => "TERMINAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("invalid run phase transition from {from} to {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

/// One entered phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: RunPhase,
    pub entered_at: DateTime<Utc>,
}

/// Tracks the phase of a single run and when each phase was entered.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: RunPhase,
    history: Vec<PhaseRecord>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Init,
            history: vec![PhaseRecord {
                phase: RunPhase::Init,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn advance(&mut self, to: RunPhase) -> Result<(), PhaseError> {
        if !self.phase.can_transition_to(to) {
            return Err(PhaseError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(from = %self.phase, %to, "run phase");
        self.phase = to;
        self.history.push(PhaseRecord {
            phase: to,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Whether the run went through `phase` at some point.
    pub fn visited(&self, phase: RunPhase) -> bool {
        self.history.iter().any(|r| r.phase == phase)
    }
}
