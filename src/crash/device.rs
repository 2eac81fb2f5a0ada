//! Crash reports pulled from a device through mlaunch

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lane_mlaunch::{MlaunchArgument, MlaunchArguments};

use super::CrashReportSource;
use crate::cancel::CancellationToken;
use crate::capture::CaptureError;
use crate::logs::SharedLog;
use crate::process::{ProcessError, ProcessManager};

const HELPER_TIMEOUT: Duration = Duration::from_secs(60);

/// Crash reports stored on a connected device.
pub struct DeviceCrashReports {
    processes: Arc<dyn ProcessManager>,
    log: SharedLog,
    device_name: String,
    verbosity: usize,
    scratch_dir: PathBuf,
}

impl DeviceCrashReports {
    pub fn new(
        processes: Arc<dyn ProcessManager>,
        log: SharedLog,
        device_name: &str,
        verbosity: usize,
    ) -> Self {
        Self {
            processes,
            log,
            device_name: device_name.to_string(),
            verbosity,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Write listing files under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn run(&self, verb: Vec<MlaunchArgument>, what: &str) -> Result<(), CaptureError> {
        let mut args = MlaunchArguments::new();
        args.push_verbosity(self.verbosity);
        args.extend(verb);
        args.push(MlaunchArgument::DeviceName(self.device_name.clone()));

        let result = self.processes.execute_command(
            &args,
            Arc::clone(&self.log),
            HELPER_TIMEOUT,
            &CancellationToken::new(),
        )?;
        if result.succeeded() {
            Ok(())
        } else {
            Err(CaptureError::Process(ProcessError::SpawnFailed {
                program: format!("mlaunch ({})", what),
                message: result.to_string(),
            }))
        }
    }
}

impl CrashReportSource for DeviceCrashReports {
    fn list(&mut self) -> Result<BTreeSet<String>, CaptureError> {
        let listing = self
            .scratch_dir
            .join(format!("crash-reports-{}.txt", uuid::Uuid::new_v4()));
        let listed = self.run(
            vec![MlaunchArgument::ListCrashReports(
                listing.display().to_string(),
            )],
            "list crash reports",
        );
        let contents = listed.and_then(|()| {
            fs::read_to_string(&listing).map_err(|e| CaptureError::io(&listing, e))
        });
        let _ = fs::remove_file(&listing);

        Ok(contents?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), CaptureError> {
        self.run(
            vec![
                MlaunchArgument::DownloadCrashReport(name.to_string()),
                MlaunchArgument::DownloadCrashReportTo(destination.display().to_string()),
            ],
            "download crash report",
        )
    }

    fn describe(&self) -> String {
        format!("device '{}'", self.device_name)
    }
}
