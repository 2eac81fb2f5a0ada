//! Device Run Lane - supervised test runs on Apple devices and simulators
//!
//! This crate installs a packaged test app, launches it through mlaunch on a
//! simulator or physical device, streams its results back over a listener,
//! and reconciles listener output, crash reports and the helper's exit into
//! a single verdict per target.

pub mod bundle;
pub mod cancel;
pub mod capture;
pub mod config;
pub mod console;
pub mod crash;
pub mod error;
pub mod hardware;
pub mod host;
pub mod listener;
pub mod logging;
pub mod logs;
pub mod process;
pub mod reporter;
pub mod run;
pub mod state;
pub mod summary;
pub mod target;
pub mod timeout;

pub use bundle::{AppBundleInformation, Extension};
pub use cancel::{CancelReason, CancellationToken, ConnectionOutcome, ConnectionSignal};
pub use config::RunnerConfig;
pub use error::RunnerError;
pub use run::{AppRunner, AppRunnerDeps, ResolvedDevice, ResolvedExecutionContext};
pub use state::{PhaseTracker, RunPhase};
pub use summary::{RunVerdict, TestExecutingResult};
pub use target::{DeviceClass, RunMode, TestTarget};
pub use timeout::RunTimeouts;
