//! mlaunch Argument Model
//!
//! Typed representation of the command line accepted by the mlaunch launch
//! helper. Arguments are collected in order; the order is significant and is
//! checked before a command line is rendered for execution.

pub mod argument;
pub mod arguments;
pub mod error;

pub use argument::{DeviceKind, MlaunchArgument};
pub use arguments::MlaunchArguments;
pub use error::ArgumentOrderError;

/// Environment variable read by the app to decide whether to start tests.
pub const ENV_AUTOSTART: &str = "NUNIT_AUTOSTART";

/// Environment variable read by the app to decide whether to exit after tests.
pub const ENV_AUTOEXIT: &str = "NUNIT_AUTOEXIT";

/// Environment variable enabling network access for the test runner.
pub const ENV_ENABLE_NETWORK: &str = "NUNIT_ENABLE_NETWORK";

/// Host (or comma-separated host list) the app reports results to.
pub const ENV_HOSTNAME: &str = "NUNIT_HOSTNAME";

/// Port the app reports results to.
pub const ENV_HOSTPORT: &str = "NUNIT_HOSTPORT";

/// Result transport kind (`TCP` or `FILE`).
pub const ENV_TRANSPORT: &str = "NUNIT_TRANSPORT";

/// Shared result file used by the file transport.
pub const ENV_LOG_FILE: &str = "NUNIT_LOG_FILE";

/// Suppresses tests that would pop up system permission dialogs.
pub const ENV_DISABLE_SYSTEM_PERMISSION_TESTS: &str = "DISABLE_SYSTEM_PERMISSION_TESTS";
