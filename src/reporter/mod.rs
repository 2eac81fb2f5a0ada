//! Result reconciliation
//!
//! The reporter collects evidence while a run is in flight (whether the app
//! connected, how the launch helper exited, what the helper printed) and
//! turns it into a single [`RunVerdict`] once the run is over.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lane_live::{ResultTally, TestCounts};

use crate::cancel::{CancelReason, CancellationToken, ConnectionOutcome};
use crate::logs::{CallbackLog, Log, SharedLog};
use crate::process::{ProcessError, ProcessExecutionResult};
use crate::summary::{RunVerdict, TestExecutingResult};
use crate::target::RunMode;

/// mlaunch diagnostic: it will not wait for the app to exit
pub const MT1111: &str = "MT1111";

/// Outcome of a launch helper invocation as the runner saw it
pub type ExecutionOutcome = Result<ProcessExecutionResult, ProcessError>;

/// Collects run evidence and reconciles it into a verdict.
///
/// Shared between the runner and the launch watcher thread, so every method
/// takes `&self`.
pub trait TestReporter: Send + Sync {
    /// The app connected, or the launch timeout passed first.
    fn launch_callback(&self, outcome: ConnectionOutcome);

    fn collect_simulator_result(&self, outcome: ExecutionOutcome);

    fn collect_device_result(&self, outcome: ExecutionOutcome);

    /// Log that watches helper output for known diagnostics.
    fn callback_log(&self) -> SharedLog;

    /// Bounds the run. Handed to process execution.
    fn cancellation_token(&self) -> CancellationToken;

    fn parse_result(&self, crash_reports: Vec<PathBuf>) -> RunVerdict;
}

/// Everything a reporter needs for one run.
#[derive(Clone)]
pub struct ReporterContext {
    pub main_log: SharedLog,
    /// Where the listener copied the app's result stream
    pub test_log: SharedLog,
    pub app_name: String,
    pub run_mode: RunMode,
    pub device_name: Option<String>,
    pub run_timeout: Duration,
    pub launch_timeout: Duration,
    /// Caller cancellation (Ctrl-C)
    pub cancel: CancellationToken,
}

pub trait TestReporterFactory: Send + Sync {
    fn create(&self, context: ReporterContext) -> Arc<dyn TestReporter>;
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilingReporterFactory;

impl TestReporterFactory for ReconcilingReporterFactory {
    fn create(&self, context: ReporterContext) -> Arc<dyn TestReporter> {
        Arc::new(ReconcilingReporter::new(context))
    }
}

#[derive(Debug, Default)]
struct Evidence {
    launch: Option<ConnectionOutcome>,
    execution: Option<ProcessExecutionResult>,
    execution_error: Option<String>,
}

/// Reconciles listener output, crash reports and the helper's exit.
pub struct ReconcilingReporter {
    context: ReporterContext,
    token: CancellationToken,
    evidence: Mutex<Evidence>,
    will_not_wait: Arc<AtomicBool>,
    callback_log: SharedLog,
}

impl ReconcilingReporter {
    pub fn new(context: ReporterContext) -> Self {
        let token = CancellationToken::linked(&context.cancel, context.run_timeout);
        let will_not_wait = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&will_not_wait);
        let callback_log: SharedLog = Arc::new(CallbackLog::new("Launch helper output", move |text| {
            if text.contains(MT1111) {
                seen.store(true, Ordering::SeqCst);
            }
        }));
        Self {
            context,
            token,
            evidence: Mutex::new(Evidence::default()),
            will_not_wait,
            callback_log,
        }
    }

    /// Whether the helper reported it would not wait for the app to exit.
    pub fn saw_will_not_wait(&self) -> bool {
        self.will_not_wait.load(Ordering::SeqCst)
    }

    fn record(&self, outcome: ExecutionOutcome) {
        let log = &self.context.main_log;
        let Ok(mut evidence) = self.evidence.lock() else {
            return;
        };
        match outcome {
            Ok(result) => {
                if result.timed_out {
                    log.write_line(&format!(
                        "Test run timed out after {:.1} minute(s)",
                        self.context.run_timeout.as_secs_f64() / 60.0
                    ));
                } else if result.succeeded() {
                    log.write_line("Test run completed");
                } else {
                    log.write_line(&format!("Test run failed: {}", result));
                }
                evidence.execution = Some(result);
            }
            Err(e) => {
                log.write_line(&format!("Test run could not be executed: {}", e));
                evidence.execution_error = Some(e.to_string());
            }
        }
    }

    fn counts(&self) -> TestCounts {
        let mut tally = ResultTally::new();
        if let Some(contents) = self.context.test_log.contents() {
            tally.observe_text(&contents);
        }
        if tally.dropped() > 0 {
            tracing::debug!(dropped = tally.dropped(), "unparsable result lines in test log");
        }
        tally.counts()
    }

    fn timed_out(&self, evidence: &Evidence) -> bool {
        evidence.execution.as_ref().map(|r| r.timed_out).unwrap_or(false)
            || self.token.reason() == Some(CancelReason::TimedOut)
    }
}

impl TestReporter for ReconcilingReporter {
    fn launch_callback(&self, outcome: ConnectionOutcome) {
        let log = &self.context.main_log;
        match outcome {
            ConnectionOutcome::Connected => log.write_line("Test run started"),
            ConnectionOutcome::TimedOut => {
                log.write_line(&format!(
                    "Test launch timed out after {:.1} minute(s)",
                    self.context.launch_timeout.as_secs_f64() / 60.0
                ));
                tracing::warn!(app = %self.context.app_name, "app did not connect within the launch timeout");
            }
            ConnectionOutcome::Abandoned => log.write_line("Test launch was cancelled"),
        }
        if let Ok(mut evidence) = self.evidence.lock() {
            evidence.launch = Some(outcome);
        }
    }

    fn collect_simulator_result(&self, outcome: ExecutionOutcome) {
        self.record(outcome);
    }

    fn collect_device_result(&self, outcome: ExecutionOutcome) {
        if self.saw_will_not_wait() {
            // Advisory only: results may still have arrived over the listener
            let device = self.context.device_name.as_deref().unwrap_or("device");
            self.context.main_log.write_line(&format!(
                "mlaunch reported {} on '{}': it did not wait for the app to exit",
                MT1111, device
            ));
            tracing::warn!(%device, "mlaunch will not wait for app exit ({})", MT1111);
        }
        self.record(outcome);
    }

    fn callback_log(&self) -> SharedLog {
        Arc::clone(&self.callback_log)
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn parse_result(&self, crash_reports: Vec<PathBuf>) -> RunVerdict {
        let counts = self.counts();
        let guard = self.evidence.lock();
        let empty = Evidence::default();
        let evidence = guard.as_deref().unwrap_or(&empty);

        // Nothing ran to completion: report a generic failure code
        let exit_code = evidence.execution.as_ref().map(|r| r.exit_code).unwrap_or(1);
        let exited_cleanly = evidence
            .execution
            .as_ref()
            .map(|r| r.succeeded())
            .unwrap_or(false);
        let crashed = !crash_reports.is_empty();
        let observed = counts.total() > 0;
        let signal = evidence.execution.as_ref().and_then(|r| r.signal.clone());
        let cancelled = evidence.execution.as_ref().map(|r| r.cancelled).unwrap_or(false)
            || matches!(
                self.token.reason(),
                Some(CancelReason::Parent) | Some(CancelReason::Requested)
            );

        let verdict = if self.timed_out(evidence) {
            RunVerdict::new(TestExecutingResult::TimedOut, exit_code).with_failure_message(format!(
                "Run timed out after {:.1} minute(s)",
                self.context.run_timeout.as_secs_f64() / 60.0
            ))
        } else if observed {
            if counts.failed > 0 {
                RunVerdict::new(TestExecutingResult::Failed, exit_code)
                    .with_failure_message(format!("{} test(s) failed", counts.failed))
            } else if crashed && !exited_cleanly {
                RunVerdict::new(TestExecutingResult::Crashed, exit_code)
                    .with_failure_message("App crashed after reporting results")
            } else if let Some(ref signal) = signal {
                RunVerdict::new(TestExecutingResult::Crashed, exit_code).with_failure_message(
                    format!("Launch helper was killed by {} after results were reported", signal),
                )
            } else if cancelled {
                RunVerdict::new(TestExecutingResult::Failed, exit_code)
                    .with_failure_message("Run was cancelled after results were reported")
            } else {
                RunVerdict::new(TestExecutingResult::Passed, exit_code)
            }
        } else if crashed {
            RunVerdict::new(TestExecutingResult::Crashed, exit_code)
                .with_failure_message("App crashed before reporting any results")
        } else if let Some(ref error) = evidence.execution_error {
            RunVerdict::new(TestExecutingResult::Failed, exit_code).with_failure_message(error.clone())
        } else if cancelled {
            RunVerdict::new(TestExecutingResult::Failed, exit_code)
                .with_failure_message("Run was cancelled")
        } else if exited_cleanly {
            RunVerdict::new(TestExecutingResult::Passed, exit_code)
        } else {
            let mut message = format!("Launch helper exited with code {}", exit_code);
            if evidence.launch != Some(ConnectionOutcome::Connected) {
                message.push_str("; the app never connected to the result listener");
            }
            RunVerdict::new(TestExecutingResult::Failed, exit_code).with_failure_message(message)
        };

        let verdict = if observed {
            verdict.with_counts(counts)
        } else {
            verdict
        };
        let verdict = verdict.with_crash_reports(crash_reports);

        self.context
            .main_log
            .write_line(&format!("Verdict: {}", verdict.human_summary()));
        tracing::info!(result = %verdict.result, exit_code, "reconciled run");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::MemoryLog;

    fn context(test_log: Arc<MemoryLog>, run_timeout: Duration) -> ReporterContext {
        ReporterContext {
            main_log: Arc::new(MemoryLog::new("main")),
            test_log,
            app_name: "Tests".to_string(),
            run_mode: RunMode::Ios,
            device_name: Some("Lab iPhone".to_string()),
            run_timeout,
            launch_timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }

    fn reporter_with(lines: &str) -> ReconcilingReporter {
        let test_log = Arc::new(MemoryLog::new("test"));
        test_log.write(lines);
        ReconcilingReporter::new(context(test_log, Duration::from_secs(600)))
    }

    const ONE_PASS_ONE_FAIL: &str =
        "<test name=\"A\" result=\"Pass\" />\n<test name=\"B\" result=\"Fail\" />\n";

    #[test]
    fn test_failed_tests_fail_the_run() {
        let reporter = reporter_with(ONE_PASS_ONE_FAIL);
        reporter.launch_callback(ConnectionOutcome::Connected);
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::exited(0)));

        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::Failed);
        let counts = verdict.counts.unwrap();
        assert_eq!((counts.passed, counts.failed), (1, 1));
        assert_eq!(verdict.status_code(), 1);
    }

    #[test]
    fn test_all_passed() {
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::exited(0)));
        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::Passed);
        assert!(verdict.failure_message.is_none());
    }

    #[test]
    fn test_no_connection_falls_back_to_exit_code() {
        let reporter = reporter_with("");
        reporter.launch_callback(ConnectionOutcome::TimedOut);
        reporter.collect_device_result(Ok(ProcessExecutionResult::exited(3)));

        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::Failed);
        assert_eq!(verdict.exit_code, 3);
        assert!(verdict.counts.is_none());
        assert!(verdict
            .failure_message
            .unwrap()
            .contains("never connected"));

        let reporter = reporter_with("");
        reporter.collect_device_result(Ok(ProcessExecutionResult::exited(0)));
        assert_eq!(reporter.parse_result(Vec::new()).result, TestExecutingResult::Passed);
    }

    #[test]
    fn test_crash_without_results() {
        let reporter = reporter_with("");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::exited(134)));
        let verdict = reporter.parse_result(vec![PathBuf::from("App.ips")]);
        assert_eq!(verdict.result, TestExecutingResult::Crashed);
        assert_eq!(verdict.crash_reports.len(), 1);
    }

    #[test]
    fn test_crash_after_passing_results() {
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::exited(139)));
        assert_eq!(
            reporter.parse_result(vec![PathBuf::from("App.ips")]).result,
            TestExecutingResult::Crashed
        );

        // A clean exit outweighs an unrelated report
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::exited(0)));
        assert_eq!(
            reporter.parse_result(vec![PathBuf::from("Other.ips")]).result,
            TestExecutingResult::Passed
        );
    }

    #[test]
    fn test_signal_after_passing_results_is_not_a_pass() {
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_device_result(Ok(ProcessExecutionResult {
            signal: Some("SIGKILL".to_string()),
            ..ProcessExecutionResult::exited(137)
        }));
        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::Crashed);
        assert_eq!(verdict.status_code(), 1);
        assert!(verdict.failure_message.as_deref().unwrap().contains("SIGKILL"));

        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult {
            cancelled: true,
            ..ProcessExecutionResult::exited(143)
        }));
        assert_eq!(reporter.parse_result(Vec::new()).result, TestExecutingResult::Failed);

        // A plain non-zero exit still defers to the listener
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::exited(1)));
        assert_eq!(reporter.parse_result(Vec::new()).result, TestExecutingResult::Passed);
    }

    #[test]
    fn test_timeout_wins() {
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter.collect_simulator_result(Ok(ProcessExecutionResult::timed_out(143)));
        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::TimedOut);
    }

    #[test]
    fn test_token_expires_with_run_timeout() {
        let reporter = ReconcilingReporter::new(context(
            Arc::new(MemoryLog::new("test")),
            Duration::from_millis(10),
        ));
        assert!(reporter.cancellation_token().wait_timeout(Duration::from_secs(5)));
        assert_eq!(
            reporter.cancellation_token().reason(),
            Some(CancelReason::TimedOut)
        );
        assert_eq!(
            reporter.parse_result(Vec::new()).result,
            TestExecutingResult::TimedOut
        );
    }

    #[test]
    fn test_caller_cancel() {
        let ctx = context(Arc::new(MemoryLog::new("test")), Duration::from_secs(600));
        let cancel = ctx.cancel.clone();
        let reporter = ReconcilingReporter::new(ctx);
        cancel.cancel();
        reporter.collect_simulator_result(Ok(ProcessExecutionResult {
            cancelled: true,
            ..ProcessExecutionResult::exited(143)
        }));
        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::Failed);
        assert_eq!(verdict.failure_message.as_deref(), Some("Run was cancelled"));
    }

    #[test]
    fn test_spawn_failure_is_folded_into_verdict() {
        let reporter = reporter_with("");
        reporter.collect_simulator_result(Err(ProcessError::SpawnFailed {
            program: "mlaunch".to_string(),
            message: "not found".to_string(),
        }));
        let verdict = reporter.parse_result(Vec::new());
        assert_eq!(verdict.result, TestExecutingResult::Failed);
        assert_eq!(verdict.exit_code, 1);
    }

    #[test]
    fn test_mt1111_is_advisory() {
        let reporter = reporter_with("<test name=\"A\" result=\"Pass\" />\n");
        reporter
            .callback_log()
            .write_line("error MT1111: mlaunch will not wait for the app to exit");
        assert!(reporter.saw_will_not_wait());

        reporter.collect_device_result(Ok(ProcessExecutionResult::exited(0)));
        assert_eq!(
            reporter.parse_result(Vec::new()).result,
            TestExecutingResult::Passed
        );
    }
}
