//! In-memory, callback and fan-out logs

use std::fmt;
use std::sync::{Arc, Mutex};

use super::{Log, SharedLog};

/// Log kept in memory; used for short-lived captures and in tests.
#[derive(Debug, Default)]
pub struct MemoryLog {
    description: String,
    buffer: Mutex<String>,
}

impl MemoryLog {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            buffer: Mutex::new(String::new()),
        }
    }
}

impl Log for MemoryLog {
    fn write(&self, text: &str) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push_str(text);
        }
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn contents(&self) -> Option<String> {
        self.buffer.lock().ok().map(|b| b.clone())
    }
}

type Callback = Box<dyn Fn(&str) + Send + Sync>;

/// Log that hands every write to a closure.
pub struct CallbackLog {
    description: String,
    callback: Mutex<Callback>,
}

impl CallbackLog {
    pub fn new(description: impl Into<String>, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            description: description.into(),
            callback: Mutex::new(Box::new(callback)),
        }
    }
}

impl fmt::Debug for CallbackLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLog")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Log for CallbackLog {
    fn write(&self, text: &str) {
        // Held across the call so callbacks never interleave
        if let Ok(callback) = self.callback.lock() {
            callback(text);
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Fans each write out to several logs.
///
/// A single lock covers the whole fan-out, so two writers never interleave
/// within one write on any member.
pub struct AggregatedLog {
    description: String,
    members: Vec<SharedLog>,
    gate: Mutex<()>,
}

impl AggregatedLog {
    pub fn new(description: impl Into<String>, members: Vec<SharedLog>) -> Self {
        Self {
            description: description.into(),
            members,
            gate: Mutex::new(()),
        }
    }

    pub fn of(members: Vec<SharedLog>) -> Arc<Self> {
        let description = members
            .iter()
            .map(|m| m.description())
            .collect::<Vec<_>>()
            .join(" + ");
        Arc::new(Self::new(description, members))
    }
}

impl fmt::Debug for AggregatedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatedLog")
            .field("description", &self.description)
            .field("members", &self.members.len())
            .finish()
    }
}

impl Log for AggregatedLog {
    fn write(&self, text: &str) {
        let _gate = self.gate.lock();
        for member in &self.members {
            member.write(text);
        }
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn flush(&self) {
        for member in &self.members {
            member.flush();
        }
    }
}
