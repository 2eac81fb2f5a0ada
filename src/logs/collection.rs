//! Per-run log collection

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::{FileLog, SharedLog};

/// tracing target for artefact upload announcements
pub const UPLOAD_TARGET: &str = "upload";

/// Index written next to the logs
pub const LOGS_INDEX_FILE: &str = "logs.json";

/// One entry of the log index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Marked for upload by CI
    #[serde(default)]
    pub upload: bool,
}

/// All logs produced by one invocation, rooted at a directory.
#[derive(Debug)]
pub struct Logs {
    directory: PathBuf,
    entries: Mutex<Vec<LogEntry>>,
}

impl Logs {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create a file log inside the directory and record it.
    pub fn create(
        &self,
        file_name: &str,
        description: &str,
        timestamp: bool,
    ) -> io::Result<Arc<FileLog>> {
        let log = FileLog::create(self.directory.join(file_name), description, timestamp)?;
        self.record(LogEntry {
            description: description.to_string(),
            path: Some(log.path().to_path_buf()),
            upload: false,
        });
        Ok(Arc::new(log))
    }

    /// Reserve a path for a file written by someone else (crash reports,
    /// copied system logs) and record it.
    pub fn create_file(&self, file_name: &str, description: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(file_name);
        self.record(LogEntry {
            description: description.to_string(),
            path: Some(path.clone()),
            upload: false,
        });
        Ok(path)
    }

    /// Record a log created elsewhere.
    pub fn add(&self, log: &SharedLog) {
        self.record(LogEntry {
            description: log.description().to_string(),
            path: log.full_path().map(Path::to_path_buf),
            upload: false,
        });
    }

    fn record(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    /// Mark an artefact for upload and announce it.
    pub fn register_upload(&self, path: &Path, description: &str) {
        tracing::info!(target: UPLOAD_TARGET, "AddFile: {}", path.display());

        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        match entries
            .iter_mut()
            .find(|e| e.path.as_deref() == Some(path))
        {
            Some(entry) => entry.upload = true,
            None => entries.push(LogEntry {
                description: description.to_string(),
                path: Some(path.to_path_buf()),
                upload: true,
            }),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.entries()
            .into_iter()
            .filter(|e| e.upload)
            .filter_map(|e| e.path)
            .collect()
    }

    /// Write `logs.json` into the directory.
    pub fn write_index(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.directory)?;
        let json = serde_json::to_string_pretty(&self.entries()).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        let path = self.directory.join(LOGS_INDEX_FILE);
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// `<prefix>-<yyyyMMdd_HHmmss>.<extension>`
pub fn timestamped_name(prefix: &str, extension: &str) -> String {
    format!(
        "{}-{}.{}",
        prefix,
        Local::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}
