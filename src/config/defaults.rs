//! Built-in defaults (lowest layer)

use serde_json::{json, Value};

/// Default run timeout in minutes.
pub const DEFAULT_RUN_TIMEOUT_MINUTES: f64 = 15.0;

/// Default wait for the app to connect to the result listener, in minutes.
pub const DEFAULT_LAUNCH_TIMEOUT_MINUTES: f64 = 15.0;

/// Default mlaunch verbosity level (rendered as level + 1 `-v` flags).
pub const DEFAULT_VERBOSITY: u32 = 3;

/// Default time crash capture keeps looking for late reports, in seconds.
pub const DEFAULT_CRASH_REPORT_WAIT_SECONDS: u64 = 5;

/// Built-in configuration as a mergeable value.
pub fn builtin_defaults() -> Value {
    json!({
        "timeouts": {
            "run_minutes": DEFAULT_RUN_TIMEOUT_MINUTES,
            "multiplier": 1.0,
            "launch_minutes": DEFAULT_LAUNCH_TIMEOUT_MINUTES,
            "install_minutes": 60.0,
            "uninstall_minutes": 1.0,
            "crash_report_wait_seconds": DEFAULT_CRASH_REPORT_WAIT_SECONDS
        },
        "simulator": {
            "ensure_clean_state": false,
            "skip_setup": false
        },
        "device": {},
        "mlaunch": {
            "path": "mlaunch",
            "verbosity": DEFAULT_VERBOSITY
        },
        "listener": {},
        "output_directory": "."
    })
}
