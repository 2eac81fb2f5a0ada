//! Device syslog tailing through mlaunch

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lane_mlaunch::{MlaunchArgument, MlaunchArguments};

use super::{CaptureError, SystemLogCapture};
use crate::logs::SharedLog;
use crate::process::{ProcessManager, RunningProcess};

/// Streams a device's system log into a log for the length of a run.
pub struct DeviceLogCapturer {
    processes: Arc<dyn ProcessManager>,
    main_log: SharedLog,
    device_log: SharedLog,
    device_name: String,
    verbosity: usize,
    path: PathBuf,
    running: Option<Box<dyn RunningProcess>>,
}

impl DeviceLogCapturer {
    pub fn new(
        processes: Arc<dyn ProcessManager>,
        main_log: SharedLog,
        device_log: SharedLog,
        device_name: &str,
        verbosity: usize,
    ) -> Self {
        let path = device_log
            .full_path()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            processes,
            main_log,
            device_log,
            device_name: device_name.to_string(),
            verbosity,
            path,
            running: None,
        }
    }

    fn arguments(&self) -> MlaunchArguments {
        let mut args = MlaunchArguments::new();
        args.push_verbosity(self.verbosity);
        args.push(MlaunchArgument::LogDevice);
        args.push(MlaunchArgument::DeviceName(self.device_name.clone()));
        args
    }
}

impl SystemLogCapture for DeviceLogCapturer {
    fn start_capture(&mut self) -> Result<(), CaptureError> {
        let args = self.arguments();
        let process = self
            .processes
            .spawn_command(&args, Arc::clone(&self.device_log))?;
        self.main_log.write_line(&format!(
            "Capturing device log for {} (pid {})",
            self.device_name,
            process
                .pid()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
        self.running = Some(process);
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), CaptureError> {
        let mut process = self.running.take().ok_or(CaptureError::NotStarted)?;
        let result = process.stop();
        self.main_log.write_line(&format!(
            "Device log capture for {} stopped: {}",
            self.device_name, result
        ));
        self.device_log.flush();
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn description(&self) -> &str {
        self.device_log.description()
    }
}

impl Drop for DeviceLogCapturer {
    fn drop(&mut self) {
        if let Some(mut process) = self.running.take() {
            process.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::logs::{Log, MemoryLog};
    use crate::process::{ProcessError, ProcessExecutionResult};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        spawned: Mutex<Vec<Vec<String>>>,
        stopped: Arc<Mutex<u32>>,
    }

    struct Tail {
        stopped: Arc<Mutex<u32>>,
    }

    impl RunningProcess for Tail {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        fn stop(&mut self) -> ProcessExecutionResult {
            *self.stopped.lock().unwrap() += 1;
            ProcessExecutionResult::exited(0)
        }
    }

    impl ProcessManager for Recorder {
        fn execute_command(
            &self,
            _args: &MlaunchArguments,
            _log: SharedLog,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<ProcessExecutionResult, ProcessError> {
            unreachable!("log capture never waits on a command")
        }

        fn spawn_command(
            &self,
            args: &MlaunchArguments,
            log: SharedLog,
        ) -> Result<Box<dyn RunningProcess>, ProcessError> {
            log.write_line("Oct 16 kernel: hello");
            self.spawned.lock().unwrap().push(args.to_argv());
            Ok(Box::new(Tail {
                stopped: Arc::clone(&self.stopped),
            }))
        }
    }

    #[test]
    fn test_start_and_stop_tail() {
        let recorder = Arc::new(Recorder::default());
        let device_log = Arc::new(MemoryLog::new("Device log"));
        let mut capture = DeviceLogCapturer::new(
            recorder.clone(),
            Arc::new(MemoryLog::new("main")),
            device_log.clone(),
            "Lab iPhone",
            1,
        );

        capture.start_capture().unwrap();
        capture.stop_capture().unwrap();

        let spawned = recorder.spawned.lock().unwrap();
        assert_eq!(
            spawned[0],
            vec!["-v", "--logdev", "--devname=Lab iPhone"]
        );
        assert_eq!(*recorder.stopped.lock().unwrap(), 1);
        assert!(device_log.contents().unwrap().contains("hello"));
        assert_eq!(capture.description(), "Device log");
    }

    #[test]
    fn test_stop_without_start() {
        let mut capture = DeviceLogCapturer::new(
            Arc::new(Recorder::default()),
            Arc::new(MemoryLog::new("main")),
            Arc::new(MemoryLog::new("Device log")),
            "Lab iPhone",
            0,
        );
        assert!(matches!(capture.stop_capture(), Err(CaptureError::NotStarted)));
    }
}
