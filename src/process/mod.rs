//! Launch helper execution
//!
//! The runner never spawns mlaunch directly; it goes through a
//! [`ProcessManager`] so the whole run can be driven by fakes in tests.

mod mlaunch;

pub use mlaunch::{MlaunchProcessManager, DEFAULT_TERMINATION_GRACE};

use std::fmt;
use std::io;
use std::time::Duration;

use lane_mlaunch::{ArgumentOrderError, MlaunchArguments};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::logs::SharedLog;

/// Errors raised before or while spawning the helper.
///
/// A helper that runs and fails is not an error; see [`ProcessExecutionResult`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("invalid mlaunch arguments: {0}")]
    InvalidArguments(#[from] ArgumentOrderError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a helper invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExecutionResult {
    pub exit_code: i32,
    /// Killed because the timeout elapsed
    pub timed_out: bool,
    /// Killed because the caller cancelled
    pub cancelled: bool,
    /// Terminating signal name, if the process died from one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl ProcessExecutionResult {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            timed_out: false,
            cancelled: false,
            signal: None,
        }
    }

    pub fn timed_out(exit_code: i32) -> Self {
        Self {
            timed_out: true,
            ..Self::exited(exit_code)
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }
}

impl fmt::Display for ProcessExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "timed out (exit code {})", self.exit_code)
        } else if self.cancelled {
            write!(f, "cancelled (exit code {})", self.exit_code)
        } else if let Some(ref signal) = self.signal {
            write!(f, "killed by {} (exit code {})", signal, self.exit_code)
        } else {
            write!(f, "exit code {}", self.exit_code)
        }
    }
}

/// A helper left running in the background (device log tailing).
pub trait RunningProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Terminate if still running and wait for output to drain.
    fn stop(&mut self) -> ProcessExecutionResult;
}

/// Executes launch helper command lines.
pub trait ProcessManager: Send + Sync {
    /// Run to completion, bounded by `timeout` and `cancel`.
    ///
    /// Output goes to `log` line by line while the process runs.
    fn execute_command(
        &self,
        args: &MlaunchArguments,
        log: SharedLog,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessExecutionResult, ProcessError>;

    /// Start without waiting; the caller stops it.
    fn spawn_command(
        &self,
        args: &MlaunchArguments,
        log: SharedLog,
    ) -> Result<Box<dyn RunningProcess>, ProcessError>;
}
