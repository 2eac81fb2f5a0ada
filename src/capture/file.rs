//! Offset-based copy of a growing log file

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{CaptureError, SystemLogCapture};

/// Copies what a system log gains between start and stop.
#[derive(Debug)]
pub struct CaptureLog {
    destination: PathBuf,
    system_log: PathBuf,
    entire_file: bool,
    description: String,
    start_offset: Option<u64>,
}

impl CaptureLog {
    pub fn new(
        destination: PathBuf,
        system_log: PathBuf,
        entire_file: bool,
        description: &str,
    ) -> Self {
        Self {
            destination,
            system_log,
            entire_file,
            description: description.to_string(),
            start_offset: None,
        }
    }
}

impl SystemLogCapture for CaptureLog {
    fn start_capture(&mut self) -> Result<(), CaptureError> {
        let offset = if self.entire_file {
            0
        } else {
            // A log that does not exist yet starts empty
            fs::metadata(&self.system_log).map(|m| m.len()).unwrap_or(0)
        };
        tracing::debug!(log = %self.system_log.display(), offset, "capturing system log");
        self.start_offset = Some(offset);
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), CaptureError> {
        let mut offset = self.start_offset.take().ok_or(CaptureError::NotStarted)?;

        let mut source =
            File::open(&self.system_log).map_err(|e| CaptureError::io(&self.system_log, e))?;
        let len = source
            .metadata()
            .map_err(|e| CaptureError::io(&self.system_log, e))?
            .len();
        if len < offset {
            // Rotated during the run
            offset = 0;
        }

        let mut captured = Vec::with_capacity((len - offset) as usize);
        source
            .seek(SeekFrom::Start(offset))
            .and_then(|_| source.take(len - offset).read_to_end(&mut captured))
            .map_err(|e| CaptureError::io(&self.system_log, e))?;

        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent).map_err(|e| CaptureError::io(parent, e))?;
        }
        fs::write(&self.destination, &captured)
            .map_err(|e| CaptureError::io(&self.destination, e))?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.destination
    }

    fn description(&self) -> &str {
        &self.description
    }
}
