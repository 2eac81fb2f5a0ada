//! mlaunch-backed process manager

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lane_mlaunch::{MlaunchArgument, MlaunchArguments};

use super::{ProcessError, ProcessExecutionResult, ProcessManager, RunningProcess};
use crate::cancel::{CancelReason, CancellationToken};
use crate::logs::SharedLog;
use crate::timeout::Deadline;

/// Time between SIGTERM and SIGKILL
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the real mlaunch binary.
#[derive(Debug, Clone)]
pub struct MlaunchProcessManager {
    mlaunch_path: PathBuf,
    xcode_root: Option<PathBuf>,
    termination_grace: Duration,
}

impl MlaunchProcessManager {
    pub fn new(mlaunch_path: impl Into<PathBuf>, xcode_root: Option<PathBuf>) -> Self {
        Self {
            mlaunch_path: mlaunch_path.into(),
            xcode_root,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn mlaunch_path(&self) -> &Path {
        &self.mlaunch_path
    }

    /// Validated argv with `--sdkroot` placed right after the verbosity flags.
    fn render(&self, args: &MlaunchArguments) -> Result<Vec<String>, ProcessError> {
        args.validate()?;

        let Some(ref root) = self.xcode_root else {
            return Ok(args.to_argv());
        };

        let mut with_root = MlaunchArguments::new();
        let mut inserted = false;
        for arg in args {
            if !inserted && *arg != MlaunchArgument::Verbosity {
                with_root.push(MlaunchArgument::SdkRoot(root.display().to_string()));
                inserted = true;
            }
            with_root.push(arg.clone());
        }
        if !inserted {
            with_root.push(MlaunchArgument::SdkRoot(root.display().to_string()));
        }
        Ok(with_root.to_argv())
    }

    fn spawn(
        &self,
        args: &MlaunchArguments,
        log: &SharedLog,
    ) -> Result<(Child, Vec<JoinHandle<()>>), ProcessError> {
        let argv = self.render(args)?;
        let program = self.mlaunch_path.display().to_string();
        log.write_line(&format!("{} {}", program, args.as_command_line()));
        tracing::debug!(program = %program, argv = ?argv, "spawning launch helper");

        let mut command = Command::new(&self.mlaunch_path);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref root) = self.xcode_root {
            command.env("DEVELOPER_DIR", root.join("Contents").join("Developer"));
        }

        let mut child = command.spawn().map_err(|e| ProcessError::SpawnFailed {
            program,
            message: e.to_string(),
        })?;

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(stream_lines(stdout, log.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(stream_lines(stderr, log.clone()));
        }

        Ok((child, readers))
    }
}

/// Copy a pipe into the log line by line on its own thread.
fn stream_lines<R: Read + Send + 'static>(pipe: R, log: SharedLog) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines().map_while(Result::ok) {
            log.write_line(&line);
        }
    })
}

fn join_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let _ = reader.join();
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
fn terminate_child(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        let _ = signal::kill(pid, Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    let start = Instant::now();
    while start.elapsed() < grace {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL);
    }

    let _ = child.kill();
    child.wait()
}

fn signal_name(status: &ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        status.signal().map(|raw| {
            nix::sys::signal::Signal::try_from(raw)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("signal {}", raw))
        })
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

/// Shell-style exit code: signalled processes report 128 + signal number.
fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(raw) = status.signal() {
            return 128 + raw;
        }
    }
    -1
}

impl ProcessManager for MlaunchProcessManager {
    fn execute_command(
        &self,
        args: &MlaunchArguments,
        log: SharedLog,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessExecutionResult, ProcessError> {
        let (mut child, readers) = self.spawn(args, &log)?;
        let deadline = Deadline::after(timeout);

        let (status, timed_out, cancelled) = loop {
            if let Some(status) = child.try_wait()? {
                break (status, false, false);
            }

            if deadline.is_expired() {
                tracing::warn!(timeout = ?timeout, "launch helper timed out, terminating");
                log.write_line(&format!("Execution timed out after {} seconds.", timeout.as_secs()));
                let status = terminate_child(&mut child, self.termination_grace)?;
                break (status, true, false);
            }

            if let Some(reason) = cancel.reason() {
                let timed_out = reason == CancelReason::TimedOut;
                tracing::info!(?reason, "launch helper cancelled, terminating");
                let status = terminate_child(&mut child, self.termination_grace)?;
                break (status, timed_out, !timed_out);
            }

            thread::sleep(POLL_INTERVAL);
        };

        join_readers(readers);
        log.flush();

        let result = ProcessExecutionResult {
            exit_code: exit_code_of(&status),
            timed_out,
            cancelled,
            signal: signal_name(&status),
        };
        tracing::debug!(%result, "launch helper finished");
        Ok(result)
    }

    fn spawn_command(
        &self,
        args: &MlaunchArguments,
        log: SharedLog,
    ) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let (child, readers) = self.spawn(args, &log)?;
        Ok(Box::new(BackgroundProcess {
            child: Some(child),
            readers,
            grace: self.termination_grace,
        }))
    }
}

struct BackgroundProcess {
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl RunningProcess for BackgroundProcess {
    fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn stop(&mut self) -> ProcessExecutionResult {
        let Some(mut child) = self.child.take() else {
            return ProcessExecutionResult::exited(0);
        };

        let status = match child.try_wait() {
            Ok(Some(status)) => Ok(status),
            _ => terminate_child(&mut child, self.grace),
        };
        join_readers(std::mem::take(&mut self.readers));

        match status {
            Ok(status) => ProcessExecutionResult {
                exit_code: exit_code_of(&status),
                timed_out: false,
                cancelled: false,
                signal: signal_name(&status),
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to reap background helper");
                ProcessExecutionResult::exited(-1)
            }
        }
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::logs::{Log, MemoryLog};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-mlaunch");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn launch_args() -> MlaunchArguments {
        let mut args = MlaunchArguments::new();
        args.push_verbosity(2);
        args.push(MlaunchArgument::env("A", "1"));
        args.push(MlaunchArgument::LaunchSimulator("/apps/Test.app".into()));
        args
    }

    #[test]
    fn test_output_streams_into_log() {
        let dir = TempDir::new().unwrap();
        let manager = MlaunchProcessManager::new(script(&dir, "echo \"$@\"; echo oops >&2; exit 3"), None);
        let log = Arc::new(MemoryLog::new("main"));

        let result = manager
            .execute_command(&launch_args(), log.clone(), Duration::from_secs(10), &CancellationToken::new())
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.succeeded());
        let contents = log.contents().unwrap();
        assert!(contents.contains("-v -v --setenv=A=1 --launchsim=/apps/Test.app"));
        assert!(contents.contains("oops"));
    }

    #[test]
    fn test_sdkroot_follows_verbosity() {
        let dir = TempDir::new().unwrap();
        let manager = MlaunchProcessManager::new(script(&dir, "echo \"$@\"; echo \"$DEVELOPER_DIR\""), Some(PathBuf::from("/Applications/Xcode.app")));
        let log = Arc::new(MemoryLog::new("main"));

        manager
            .execute_command(&launch_args(), log.clone(), Duration::from_secs(10), &CancellationToken::new())
            .unwrap();

        let contents = log.contents().unwrap();
        assert!(contents.contains("-v -v --sdkroot /Applications/Xcode.app --setenv=A=1"));
        assert!(contents.contains("/Applications/Xcode.app/Contents/Developer"));
    }

    #[test]
    fn test_timeout_terminates() {
        let dir = TempDir::new().unwrap();
        let manager = MlaunchProcessManager::new(script(&dir, "exec sleep 30"), None)
            .with_termination_grace(Duration::from_millis(500));
        let log = Arc::new(MemoryLog::new("main"));

        let started = Instant::now();
        let result = manager
            .execute_command(&launch_args(), log, Duration::from_millis(300), &CancellationToken::new())
            .unwrap();

        assert!(result.timed_out);
        assert!(!result.cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_terminates() {
        let dir = TempDir::new().unwrap();
        let manager = MlaunchProcessManager::new(script(&dir, "exec sleep 30"), None)
            .with_termination_grace(Duration::from_millis(500));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = manager
            .execute_command(&launch_args(), Arc::new(MemoryLog::new("main")), Duration::from_secs(30), &cancel)
            .unwrap();

        assert!(result.cancelled);
        assert!(!result.timed_out);
    }

    #[test]
    fn test_invalid_order_rejected_before_spawn() {
        let mut args = MlaunchArguments::new();
        args.push(MlaunchArgument::LaunchSimulator("/apps/Test.app".into()));
        args.push(MlaunchArgument::env("LATE", "1"));

        let manager = MlaunchProcessManager::new("/nonexistent/mlaunch", None);
        let err = manager
            .execute_command(&args, Arc::new(MemoryLog::new("main")), Duration::from_secs(1), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidArguments(_)));
    }

    #[test]
    fn test_spawn_failure() {
        let manager = MlaunchProcessManager::new("/nonexistent/mlaunch", None);
        let err = manager
            .execute_command(&launch_args(), Arc::new(MemoryLog::new("main")), Duration::from_secs(1), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[test]
    fn test_background_process_stops() {
        let dir = TempDir::new().unwrap();
        let manager = MlaunchProcessManager::new(script(&dir, "echo tailing; exec sleep 30"), None)
            .with_termination_grace(Duration::from_millis(500));
        let log = Arc::new(MemoryLog::new("device"));

        let mut args = MlaunchArguments::new();
        args.push(MlaunchArgument::LogDevice);
        let mut running = manager.spawn_command(&args, log.clone()).unwrap();
        assert!(running.pid().is_some());

        thread::sleep(Duration::from_millis(200));
        let result = running.stop();
        assert_eq!(result.signal.as_deref(), Some("SIGTERM"));
        assert!(log.contents().unwrap().contains("tailing"));
        assert!(running.pid().is_none());
    }
}
