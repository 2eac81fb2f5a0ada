//! Crash snapshot capture
//!
//! A snapshot of the crash reports that exist is taken just before launch.
//! After the run, anything new is copied into the run's log directory and
//! registered for upload. The reports themselves are never decoded.

mod device;
mod host;

pub use device::DeviceCrashReports;
pub use host::{default_reports_directory, HostDiagnosticReports};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::capture::CaptureError;
use crate::logs::{Logs, SharedLog};
use crate::process::ProcessManager;
use crate::timeout::Deadline;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Where crash reports come from.
pub trait CrashReportSource: Send {
    /// Names of the reports present right now.
    fn list(&mut self) -> Result<BTreeSet<String>, CaptureError>;

    /// Copy one report to `destination`.
    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), CaptureError>;

    fn describe(&self) -> String;
}

/// Brackets a run and surfaces the crash reports it produced.
pub trait CrashSnapshotReporter: Send {
    fn start_capture(&mut self) -> Result<(), CaptureError>;

    /// Collect reports that appeared since [`start_capture`], waiting up to
    /// `wait` for slow writers.
    ///
    /// [`start_capture`]: CrashSnapshotReporter::start_capture
    fn end_capture(&mut self, wait: Duration) -> Result<Vec<PathBuf>, CaptureError>;
}

pub trait CrashSnapshotReporterFactory: Send + Sync {
    fn create(
        &self,
        main_log: SharedLog,
        logs: Arc<Logs>,
        is_device: bool,
        device_name: &str,
    ) -> Box<dyn CrashSnapshotReporter>;
}

/// Diff-based reporter over any [`CrashReportSource`].
pub struct SnapshotCrashReporter {
    source: Box<dyn CrashReportSource>,
    main_log: SharedLog,
    logs: Arc<Logs>,
    initial: Option<BTreeSet<String>>,
}

impl SnapshotCrashReporter {
    pub fn new(source: Box<dyn CrashReportSource>, main_log: SharedLog, logs: Arc<Logs>) -> Self {
        Self {
            source,
            main_log,
            logs,
            initial: None,
        }
    }

    fn new_reports(&mut self, initial: &BTreeSet<String>) -> Result<Vec<String>, CaptureError> {
        let current = self.source.list()?;
        Ok(current.difference(initial).cloned().collect())
    }
}

impl CrashSnapshotReporter for SnapshotCrashReporter {
    fn start_capture(&mut self) -> Result<(), CaptureError> {
        let initial = self.source.list()?;
        self.main_log.write_line(&format!(
            "Crash snapshot of {}: {} existing report(s)",
            self.source.describe(),
            initial.len()
        ));
        self.initial = Some(initial);
        Ok(())
    }

    fn end_capture(&mut self, wait: Duration) -> Result<Vec<PathBuf>, CaptureError> {
        let initial = self.initial.take().ok_or(CaptureError::NotStarted)?;
        let deadline = Deadline::after(wait);

        let found = loop {
            let found = self.new_reports(&initial)?;
            if !found.is_empty() || deadline.is_expired() {
                break found;
            }
            thread::sleep(POLL_INTERVAL.min(deadline.remaining()));
        };

        if found.is_empty() {
            self.main_log.write_line("No new crash reports");
            return Ok(Vec::new());
        }

        let mut copied = Vec::with_capacity(found.len());
        for name in found {
            let description = format!("Crash report: {}", name);
            let destination = self
                .logs
                .create_file(&file_name_of(&name), &description)
                .map_err(|e| CaptureError::io(self.logs.directory(), e))?;
            match self.source.fetch(&name, &destination) {
                Ok(()) => {
                    self.main_log
                        .write_line(&format!("Found crash report {}", destination.display()));
                    self.logs.register_upload(&destination, &description);
                    copied.push(destination);
                }
                Err(e) => {
                    tracing::warn!(report = %name, error = %e, "failed to collect crash report");
                    self.main_log
                        .write_line(&format!("Could not collect crash report {}: {}", name, e));
                }
            }
        }
        Ok(copied)
    }
}

/// Last path component, so remote names cannot escape the log directory.
fn file_name_of(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "crash-report".to_string())
}

/// Host DiagnosticReports for simulators, mlaunch for devices.
pub struct DefaultCrashSnapshotReporterFactory {
    processes: Arc<dyn ProcessManager>,
    verbosity: usize,
    reports_directory: Option<PathBuf>,
}

impl DefaultCrashSnapshotReporterFactory {
    pub fn new(processes: Arc<dyn ProcessManager>, verbosity: usize) -> Self {
        Self {
            processes,
            verbosity,
            reports_directory: None,
        }
    }

    /// Watch `dir` instead of `~/Library/Logs/DiagnosticReports`.
    pub fn with_reports_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_directory = Some(dir.into());
        self
    }
}

impl CrashSnapshotReporterFactory for DefaultCrashSnapshotReporterFactory {
    fn create(
        &self,
        main_log: SharedLog,
        logs: Arc<Logs>,
        is_device: bool,
        device_name: &str,
    ) -> Box<dyn CrashSnapshotReporter> {
        let source: Box<dyn CrashReportSource> = if is_device {
            Box::new(DeviceCrashReports::new(
                Arc::clone(&self.processes),
                Arc::clone(&main_log),
                device_name,
                self.verbosity,
            ))
        } else {
            let dir = self
                .reports_directory
                .clone()
                .unwrap_or_else(default_reports_directory);
            Box::new(HostDiagnosticReports::new(dir))
        };
        Box::new(SnapshotCrashReporter::new(source, main_log, logs))
    }
}
