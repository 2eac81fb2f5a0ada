//! File-backed log

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use super::Log;

#[derive(Debug)]
struct FileState {
    file: Option<File>,
    at_line_start: bool,
    failed: bool,
}

/// Append-only log on disk, optionally prefixing each line with a timestamp.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    description: String,
    timestamp: bool,
    state: Mutex<FileState>,
}

impl FileLog {
    /// Create (or truncate) the log file, creating parent directories.
    pub fn create(
        path: impl Into<PathBuf>,
        description: impl Into<String>,
        timestamp: bool,
    ) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            description: description.into(),
            timestamp,
            state: Mutex::new(FileState {
                file: Some(file),
                at_line_start: true,
                failed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp_lines(text: &str, at_line_start: &mut bool) -> String {
        let prefix = format!("[{}] ", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
        let mut out = String::with_capacity(text.len() + prefix.len());
        for segment in text.split_inclusive('\n') {
            if *at_line_start {
                out.push_str(&prefix);
            }
            out.push_str(segment);
            *at_line_start = segment.ends_with('\n');
        }
        out
    }
}

impl Log for FileLog {
    fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let state = &mut *state;

        let rendered = if self.timestamp {
            Self::stamp_lines(text, &mut state.at_line_start)
        } else {
            text.to_string()
        };

        let result = match state.file.as_mut() {
            Some(file) => file.write_all(rendered.as_bytes()),
            None => return,
        };
        if let Err(e) = result {
            // Warn once per log; the run goes on without this sink
            if !state.failed {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to write log");
                state.failed = true;
            }
        }
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn full_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn contents(&self) -> Option<String> {
        self.flush();
        fs::read_to_string(&self.path).ok()
    }

    fn flush(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(file) = state.file.as_mut() {
                let _ = file.flush();
            }
        }
    }
}
