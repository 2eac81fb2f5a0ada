//! Run verdict
//!
//! Every run that gets past launch ends in exactly one [`RunVerdict`],
//! written as `<target>-verdict.json` next to the run's logs.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lane_live::TestCounts;
use serde::{Deserialize, Serialize};

use crate::target::TestTarget;

/// Suffix of the verdict file written per target
pub const VERDICT_FILE_SUFFIX: &str = "-verdict.json";

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestExecutingResult {
    Passed,
    Failed,
    TimedOut,
    /// The app died before reporting a result
    Crashed,
}

impl TestExecutingResult {
    pub fn is_success(&self) -> bool {
        *self == TestExecutingResult::Passed
    }
}

impl fmt::Display for TestExecutingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestExecutingResult::Passed => "passed",
            TestExecutingResult::Failed => "failed",
            TestExecutingResult::TimedOut => "timed out",
            TestExecutingResult::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunVerdict {
    pub result: TestExecutingResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Per-test counts, when the app reported any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<TestCounts>,

    /// Exit code of the launch helper
    pub exit_code: i32,

    /// Crash reports collected for the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crash_reports: Vec<PathBuf>,
}

impl RunVerdict {
    pub fn new(result: TestExecutingResult, exit_code: i32) -> Self {
        Self {
            result,
            failure_message: None,
            counts: None,
            exit_code,
            crash_reports: Vec::new(),
        }
    }

    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    pub fn with_counts(mut self, counts: TestCounts) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn with_crash_reports(mut self, reports: Vec<PathBuf>) -> Self {
        self.crash_reports = reports;
        self
    }

    /// 0 on success, 1 otherwise. The helper's own code stays in `exit_code`.
    pub fn status_code(&self) -> i32 {
        if self.result.is_success() {
            0
        } else {
            1
        }
    }

    /// One-line description for the console
    pub fn human_summary(&self) -> String {
        let mut line = format!("Tests {}", self.result);
        if let Some(counts) = self.counts {
            line.push_str(&format!(
                ": {} passed, {} failed, {} inconclusive, {} filtered",
                counts.passed, counts.failed, counts.inconclusive, counts.filtered
            ));
        }
        if let Some(ref message) = self.failure_message {
            line.push_str(&format!(" ({})", message));
        }
        line
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }

    /// `<dir>/<target>-verdict.json`
    pub fn path_for(directory: &Path, target: TestTarget) -> PathBuf {
        directory.join(format!("{}{}", target.as_str(), VERDICT_FILE_SUFFIX))
    }
}
