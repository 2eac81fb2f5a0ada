//! Run logs
//!
//! Every sink a run writes to implements [`Log`]. Sinks are shared as
//! `Arc<dyn Log>` between the listener thread, process reader threads and the
//! orchestrator, so writes take `&self` and each implementation serialises
//! its own output.

mod collection;
mod file;
mod memory;

pub use collection::{timestamped_name, LogEntry, Logs, LOGS_INDEX_FILE, UPLOAD_TARGET};
pub use file::FileLog;
pub use memory::{AggregatedLog, CallbackLog, MemoryLog};

use std::path::Path;
use std::sync::Arc;

/// Append-only text sink.
pub trait Log: Send + Sync {
    /// Append raw text. Implementations keep each call contiguous.
    fn write(&self, text: &str);

    fn write_line(&self, line: &str) {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.write(&text);
    }

    fn description(&self) -> &str;

    /// Backing file, if the log lives on disk.
    fn full_path(&self) -> Option<&Path> {
        None
    }

    /// Everything written so far, when the sink can be read back.
    fn contents(&self) -> Option<String> {
        None
    }

    fn flush(&self) {}
}

/// Shared handle used throughout the runner.
pub type SharedLog = Arc<dyn Log>;
