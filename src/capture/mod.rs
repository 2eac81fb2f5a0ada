//! System log capture
//!
//! Simulators write their system log to a file on the host; capture copies
//! whatever is appended during the run. Devices stream their log through
//! `mlaunch --logdev`, which runs in the background until stopped.

mod device;
mod file;

pub use device::DeviceLogCapturer;
pub use file::CaptureLog;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::logs::{Logs, SharedLog};
use crate::process::{ProcessError, ProcessManager};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("capture helper failed: {0}")]
    Process(#[from] ProcessError),

    #[error("capture not started")]
    NotStarted,
}

impl CaptureError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        CaptureError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A log captured over the run window.
pub trait SystemLogCapture: Send {
    fn start_capture(&mut self) -> Result<(), CaptureError>;

    fn stop_capture(&mut self) -> Result<(), CaptureError>;

    /// Where the captured copy lives.
    fn path(&self) -> &Path;

    fn description(&self) -> &str;
}

/// Creates simulator system log captures.
pub trait CaptureLogFactory: Send + Sync {
    fn create(
        &self,
        destination: PathBuf,
        system_log: PathBuf,
        entire_file: bool,
        description: &str,
    ) -> Box<dyn SystemLogCapture>;
}

/// Creates device log tailers.
pub trait DeviceLogCapturerFactory: Send + Sync {
    fn create(
        &self,
        main_log: SharedLog,
        device_log: SharedLog,
        device_name: &str,
    ) -> Box<dyn SystemLogCapture>;
}

/// File-offset captures for simulators.
#[derive(Debug, Clone, Default)]
pub struct DefaultCaptureLogFactory;

impl CaptureLogFactory for DefaultCaptureLogFactory {
    fn create(
        &self,
        destination: PathBuf,
        system_log: PathBuf,
        entire_file: bool,
        description: &str,
    ) -> Box<dyn SystemLogCapture> {
        Box::new(CaptureLog::new(destination, system_log, entire_file, description))
    }
}

/// `mlaunch --logdev` tailers for devices.
pub struct DefaultDeviceLogCapturerFactory {
    processes: Arc<dyn ProcessManager>,
    verbosity: usize,
}

impl DefaultDeviceLogCapturerFactory {
    pub fn new(processes: Arc<dyn ProcessManager>, verbosity: usize) -> Self {
        Self {
            processes,
            verbosity,
        }
    }
}

impl DeviceLogCapturerFactory for DefaultDeviceLogCapturerFactory {
    fn create(
        &self,
        main_log: SharedLog,
        device_log: SharedLog,
        device_name: &str,
    ) -> Box<dyn SystemLogCapture> {
        Box::new(DeviceLogCapturer::new(
            Arc::clone(&self.processes),
            main_log,
            device_log,
            device_name,
            self.verbosity,
        ))
    }
}

/// Stop a capture and register its copy for upload.
pub(crate) fn stop_and_register(capture: &mut dyn SystemLogCapture, logs: &Logs) {
    match capture.stop_capture() {
        Ok(()) if capture.path().is_file() => {
            logs.register_upload(capture.path(), capture.description())
        }
        Ok(()) => {}
        Err(e) => {
            tracing::warn!(error = %e, log = capture.description(), "failed to stop log capture")
        }
    }
}
