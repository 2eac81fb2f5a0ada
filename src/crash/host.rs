//! Crash reports written on the host (simulators)

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::CrashReportSource;
use crate::capture::CaptureError;

const REPORT_EXTENSIONS: &[&str] = &["crash", "ips", "panic"];

/// `~/Library/Logs/DiagnosticReports`
pub fn default_reports_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join("Library/Logs/DiagnosticReports")
}

/// Reports in a host directory. Simulator apps crash on the host, so their
/// reports land next to the host's own.
#[derive(Debug, Clone)]
pub struct HostDiagnosticReports {
    directory: PathBuf,
}

impl HostDiagnosticReports {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

fn is_report(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| REPORT_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

impl CrashReportSource for HostDiagnosticReports {
    fn list(&mut self) -> Result<BTreeSet<String>, CaptureError> {
        if !self.directory.is_dir() {
            return Ok(BTreeSet::new());
        }
        let names = WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_report(e.path()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), CaptureError> {
        let source = self.directory.join(name);
        fs::copy(&source, destination).map_err(|e| CaptureError::io(&source, e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.directory.display().to_string()
    }
}
