//! Run orchestrator
//!
//! [`AppRunner`] drives one app through install, uninstall or a supervised
//! test run against a single target. A test run walks the [`RunPhase`]
//! machine:
//!
//! - target resolution and argument building may fail and abort before
//!   anything is started;
//! - once captures are started every exit path goes through reconcile and
//!   cleanup, so the listener is released, captures are stopped and a
//!   verdict is produced even when the run times out.
//!
//! Background work (listener accept loop, launch watcher, device log tailer)
//! runs on plain threads; the orchestrator itself is synchronous.

pub mod arguments;
pub mod resolve;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::bundle::AppBundleInformation;
use crate::cancel::CancellationToken;
use crate::capture::{
    stop_and_register, CaptureLogFactory, DefaultCaptureLogFactory,
    DefaultDeviceLogCapturerFactory, DeviceLogCapturerFactory, SystemLogCapture,
};
use crate::config::RunnerConfig;
use crate::crash::{
    CrashSnapshotReporter, CrashSnapshotReporterFactory, DefaultCrashSnapshotReporterFactory,
};
use crate::error::RunnerError;
use crate::hardware::{
    DeviceLoader, DevicectlDeviceLoader, SharedSimulator, SimctlSimulatorLoader, SimulatorLoader,
};
use crate::host;
use crate::listener::{
    DefaultListenerFactory, ListenerFactory, ListenerGuard, ListenerRequest,
};
use crate::logs::{timestamped_name, AggregatedLog, Log, Logs, SharedLog};
use crate::process::{MlaunchProcessManager, ProcessExecutionResult, ProcessManager};
use crate::reporter::{
    ReconcilingReporterFactory, ReporterContext, TestReporter, TestReporterFactory,
};
use crate::state::{PhaseTracker, RunPhase};
use crate::summary::{RunVerdict, TestExecutingResult};
use crate::target::TestTarget;

pub use arguments::{
    install_arguments, launch_descriptor, uninstall_arguments, LaunchArgumentBuilder,
    LaunchTarget, ListenerEndpoint, OutputRedirect,
};
pub use resolve::{select_device, ResolvedDevice, ResolvedExecutionContext};

use lane_mlaunch::MlaunchArguments;

/// Collaborators a runner is built from.
///
/// Tests swap any of these for fakes; [`AppRunnerDeps::system`] wires the
/// real ones.
pub struct AppRunnerDeps {
    pub processes: Arc<dyn ProcessManager>,
    pub simulator_loader: Box<dyn SimulatorLoader>,
    pub device_loader: Box<dyn DeviceLoader>,
    pub listener_factory: Box<dyn ListenerFactory>,
    pub crash_reporter_factory: Box<dyn CrashSnapshotReporterFactory>,
    pub capture_log_factory: Box<dyn CaptureLogFactory>,
    pub device_log_capturer_factory: Box<dyn DeviceLogCapturerFactory>,
    pub reporter_factory: Box<dyn TestReporterFactory>,
}

impl AppRunnerDeps {
    /// mlaunch, simctl and devicectl backed collaborators.
    pub fn system(config: &RunnerConfig) -> Self {
        let processes: Arc<dyn ProcessManager> = Arc::new(MlaunchProcessManager::new(
            config.mlaunch.path.clone(),
            config.mlaunch.xcode_root.clone(),
        ));
        let verbosity = config.verbosity_flags();
        let mut crash_reporter_factory =
            DefaultCrashSnapshotReporterFactory::new(Arc::clone(&processes), verbosity);
        if let Some(ref dir) = config.crash_reports_directory {
            crash_reporter_factory = crash_reporter_factory.with_reports_directory(dir.clone());
        }
        Self {
            processes: Arc::clone(&processes),
            simulator_loader: Box::new(SimctlSimulatorLoader::new()),
            device_loader: Box::new(DevicectlDeviceLoader::new()),
            listener_factory: Box::new(DefaultListenerFactory::new()),
            crash_reporter_factory: Box::new(crash_reporter_factory),
            capture_log_factory: Box::new(DefaultCaptureLogFactory),
            device_log_capturer_factory: Box::new(DefaultDeviceLogCapturerFactory::new(
                processes, verbosity,
            )),
            reporter_factory: Box::new(ReconcilingReporterFactory),
        }
    }
}

/// Everything built before anything is started.
struct PreparedRun {
    args: MlaunchArguments,
    listener: ListenerGuard,
    test_log: SharedLog,
    simulators: Vec<SharedSimulator>,
    device: Option<ResolvedDevice>,
}

/// Captures running while the helper executes.
struct ActiveCaptures {
    system_logs: Vec<Box<dyn SystemLogCapture>>,
    device_log: Option<Box<dyn SystemLogCapture>>,
    crash: Box<dyn CrashSnapshotReporter>,
    crash_started: bool,
}

/// Installs, uninstalls and runs one app on one target.
pub struct AppRunner {
    deps: AppRunnerDeps,
    config: RunnerConfig,
    target: TestTarget,
    app: AppBundleInformation,
    logs: Arc<Logs>,
    main_log: SharedLog,
    cancel: CancellationToken,
    /// Also receives the app's result stream as it arrives
    live_output: Option<SharedLog>,
    context: ResolvedExecutionContext,
    phases: PhaseTracker,
    verdict: Option<RunVerdict>,
}

impl AppRunner {
    pub fn new(
        deps: AppRunnerDeps,
        config: RunnerConfig,
        target: TestTarget,
        app: AppBundleInformation,
        logs: Arc<Logs>,
        main_log: SharedLog,
    ) -> Self {
        Self {
            deps,
            config,
            target,
            app,
            logs,
            main_log,
            cancel: CancellationToken::new(),
            live_output: None,
            context: ResolvedExecutionContext::new(),
            phases: PhaseTracker::new(),
            verdict: None,
        }
    }

    /// Use simulators the caller already booted instead of discovering them.
    pub fn with_simulators(mut self, simulators: Vec<SharedSimulator>) -> Self {
        self.context = ResolvedExecutionContext::with_simulators(simulators);
        self
    }

    /// Cancel runs when `token` fires (Ctrl-C).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_live_output(mut self, log: SharedLog) -> Self {
        self.live_output = Some(log);
        self
    }

    pub fn target(&self) -> TestTarget {
        self.target
    }

    pub fn context(&self) -> &ResolvedExecutionContext {
        &self.context
    }

    /// Phases the last run went through.
    pub fn phases(&self) -> &PhaseTracker {
        &self.phases
    }

    pub fn verdict(&self) -> Option<&RunVerdict> {
        self.verdict.as_ref()
    }

    pub fn result(&self) -> Option<TestExecutingResult> {
        self.verdict.as_ref().map(|v| v.result)
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.verdict.as_ref().and_then(|v| v.failure_message.as_deref())
    }

    fn is_simulator(&self) -> bool {
        self.target.is_simulator()
    }

    fn resolve_device(&mut self) -> Result<ResolvedDevice, RunnerError> {
        let device = self.context.resolve_device(
            self.deps.device_loader.as_ref(),
            self.target.run_mode(),
            self.config.device.name.as_deref(),
            self.config.device.companion_name.as_deref(),
            &self.main_log,
        )?;
        Ok(device.clone())
    }

    fn resolve_simulators(&mut self) -> Result<Vec<SharedSimulator>, RunnerError> {
        let simulators = self.context.resolve_simulators(
            self.deps.simulator_loader.as_ref(),
            self.target,
            &self.main_log,
        )?;
        Ok(simulators.to_vec())
    }

    /// Install the app on the resolved device.
    ///
    /// A helper that runs and fails is returned as a result, not an error.
    pub fn install(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ProcessExecutionResult, RunnerError> {
        if self.is_simulator() {
            return Err(RunnerError::InvalidOperation(
                "Installing to a simulator is not supported.".to_string(),
            ));
        }
        let device = self.resolve_device()?;
        let args = install_arguments(
            self.config.verbosity_flags(),
            &self.app.app_path,
            &device,
            self.target.run_mode(),
        );

        self.main_log.write_line(&format!(
            "Installing '{}' ({} bytes) to '{}'",
            self.app.app_path.display(),
            self.app.total_size(),
            device.install_target()
        ));
        tracing::info!(app = %self.app.app_name, device = %device.name, "installing");

        let result = self.deps.processes.execute_command(
            &args,
            Arc::clone(&self.main_log),
            self.config.install_timeout(),
            cancel,
        )?;
        if !result.succeeded() {
            self.main_log
                .write_line(&format!("Install failed: {}", result));
        }
        Ok(result)
    }

    /// Remove the app from the resolved device.
    pub fn uninstall(&mut self) -> Result<ProcessExecutionResult, RunnerError> {
        if self.is_simulator() {
            return Err(RunnerError::InvalidOperation(
                "Uninstalling from a simulator is not supported.".to_string(),
            ));
        }
        let device = self.resolve_device()?;
        let args = uninstall_arguments(
            self.config.verbosity_flags(),
            &self.app.bundle_identifier,
            &device,
        );
        tracing::info!(bundle = %self.app.bundle_identifier, device = %device.name, "uninstalling");

        let result = self.deps.processes.execute_command(
            &args,
            Arc::clone(&self.main_log),
            self.config.uninstall_timeout(),
            &self.cancel,
        )?;
        Ok(result)
    }

    /// Run the app's tests and reconcile the outcome into one verdict.
    ///
    /// Errors are only returned for faults before launch (resolution,
    /// unsupported extensions, listener setup). Everything later is folded
    /// into the verdict.
    pub fn run(&mut self) -> Result<RunVerdict, RunnerError> {
        self.phases = PhaseTracker::new();
        self.verdict = None;

        let prepared = match self.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                self.main_log.write_line(&format!("Run aborted: {}", e));
                tracing::warn!(
                    test_target = %self.target,
                    phase = %self.phases.phase(),
                    error = %e,
                    "run aborted before launch"
                );
                self.phases.advance(RunPhase::Terminal)?;
                return Err(e);
            }
        };

        let verdict = self.execute(prepared)?;
        self.verdict = Some(verdict.clone());
        Ok(verdict)
    }

    fn prepare(&mut self) -> Result<PreparedRun, RunnerError> {
        let is_simulator = self.is_simulator();
        let run_mode = self.target.run_mode();

        self.phases.advance(RunPhase::ResolveTarget)?;
        let (simulators, device) = if is_simulator {
            (self.resolve_simulators()?, None)
        } else {
            (Vec::new(), Some(self.resolve_device()?))
        };

        self.phases.advance(RunPhase::BuildArguments)?;
        let descriptor = launch_descriptor(&self.app, is_simulator)?;

        let test_log: SharedLog = self.logs.create(
            &timestamped_name(&format!("test-{}", run_mode), "log"),
            "TestLog",
            false,
        )?;
        let request = ListenerRequest {
            run_mode,
            is_simulator,
            auto_exit: true,
            xml_output: false,
            prefer_file_transport: self.config.listener.use_file_transport,
        };
        let sink: SharedLog = match &self.live_output {
            Some(live) => {
                AggregatedLog::of(vec![Arc::clone(&test_log), Arc::clone(live)]) as SharedLog
            }
            None => Arc::clone(&test_log),
        };
        let setup = self
            .deps
            .listener_factory
            .create(&request, Arc::clone(&self.main_log), sink)?;
        let transport = setup.transport;
        let log_file = setup.temp_file;
        let mut listener = ListenerGuard::new(setup.listener);
        let port = listener.listener().initialize()?;

        let endpoint = ListenerEndpoint {
            transport,
            host: host::listener_hosts(is_simulator, self.config.listener.host.as_deref()),
            port,
            log_file,
        };
        self.main_log.write_line(&format!(
            "Result listener ready: {} on {}:{}",
            transport, endpoint.host, endpoint.port
        ));

        let launch_target = match (&device, simulators.first()) {
            (Some(device), _) => LaunchTarget::Device {
                name: device.name.clone(),
            },
            (None, Some(primary)) => LaunchTarget::Simulator {
                udid: primary.udid().to_string(),
                output: self.simulator_output()?,
            },
            (None, None) => {
                return Err(RunnerError::NoSimulatorFound {
                    target: self.target.to_string(),
                })
            }
        };

        let args = LaunchArgumentBuilder::new(
            self.config.verbosity_flags(),
            run_mode,
            endpoint,
            descriptor,
            launch_target,
        )
        .build();
        args.validate().map_err(crate::process::ProcessError::from)?;

        Ok(PreparedRun {
            args,
            listener,
            test_log,
            simulators,
            device,
        })
    }

    /// The invoking terminal when there is one, else a pair of log files.
    fn simulator_output(&self) -> Result<Option<OutputRedirect>, RunnerError> {
        if let Some(tty) = host::stderr_terminal() {
            return Ok(Some(OutputRedirect::Terminal(tty)));
        }
        let stdout = self
            .logs
            .create_file(&timestamped_name("stdout", "log"), "Standard output")?;
        let stderr = self
            .logs
            .create_file(&timestamped_name("stderr", "log"), "Standard error")?;
        Ok(Some(OutputRedirect::Files { stdout, stderr }))
    }

    fn execute(&mut self, prepared: PreparedRun) -> Result<RunVerdict, RunnerError> {
        let PreparedRun {
            args,
            mut listener,
            test_log,
            simulators,
            device,
        } = prepared;
        let timeouts = self.config.run_timeouts();

        self.phases.advance(RunPhase::StartCapture)?;
        if let Err(e) = listener.listener().start() {
            self.main_log
                .write_line(&format!("Failed to start the result listener: {}", e));
        }

        let reporter = self.deps.reporter_factory.create(ReporterContext {
            main_log: Arc::clone(&self.main_log),
            test_log,
            app_name: self.app.app_name.clone(),
            run_mode: self.target.run_mode(),
            device_name: device.as_ref().map(|d| d.name.clone()),
            run_timeout: timeouts.run,
            launch_timeout: timeouts.launch,
            cancel: self.cancel.clone(),
        });
        let watcher = spawn_launch_watcher(&reporter, &listener, timeouts.launch);

        let mut captures = self.start_captures(&simulators, device.as_ref());

        self.phases.advance(RunPhase::Launch)?;
        self.main_log.write_line(&format!(
            "Starting test run for '{}' on {}",
            self.app.app_name, self.target
        ));
        tracing::info!(app = %self.app.app_name, test_target = %self.target, "launching");
        let token = reporter.cancellation_token();

        self.phases.advance(RunPhase::Supervise)?;
        if device.is_some() {
            let log: SharedLog =
                AggregatedLog::of(vec![reporter.callback_log(), Arc::clone(&self.main_log)]);
            let outcome = self
                .deps
                .processes
                .execute_command(&args, log, timeouts.run, &token);
            reporter.collect_device_result(outcome);
            if let Some(mut capture) = captures.device_log.take() {
                stop_and_register(capture.as_mut(), &self.logs);
            }
        } else {
            let outcome = self.deps.processes.execute_command(
                &args,
                Arc::clone(&self.main_log),
                timeouts.run,
                &token,
            );
            reporter.collect_simulator_result(outcome);
        }

        self.phases.advance(RunPhase::Reconcile)?;
        // Final drain of the result stream before anything is parsed
        listener.release();
        if watcher.join().is_err() {
            tracing::warn!("launch watcher panicked");
        }
        let crash_reports = if captures.crash_started {
            captures
                .crash
                .end_capture(self.config.crash_report_wait())
                .unwrap_or_else(|e| {
                    self.main_log
                        .write_line(&format!("Failed to collect crash reports: {}", e));
                    Vec::new()
                })
        } else {
            Vec::new()
        };
        let verdict = reporter.parse_result(crash_reports);

        self.phases.advance(RunPhase::Cleanup)?;
        self.cleanup(&simulators, captures, &verdict);

        self.phases.advance(RunPhase::Terminal)?;
        self.main_log.write_line(&verdict.human_summary());
        tracing::info!(test_target = %self.target, result = %verdict.result, "run finished");
        Ok(verdict)
    }

    fn start_captures(
        &self,
        simulators: &[SharedSimulator],
        device: Option<&ResolvedDevice>,
    ) -> ActiveCaptures {
        let device_name = device.map(|d| d.name.as_str()).unwrap_or_default();
        let crash = self.deps.crash_reporter_factory.create(
            Arc::clone(&self.main_log),
            Arc::clone(&self.logs),
            device.is_some(),
            device_name,
        );
        let mut captures = ActiveCaptures {
            system_logs: Vec::new(),
            device_log: None,
            crash,
            crash_started: false,
        };

        for (index, sim) in simulators.iter().enumerate() {
            let description = if index == 0 {
                "SystemLog"
            } else {
                "CompanionSystemLog"
            };
            let destination = match self
                .logs
                .create_file(&format!("{}.log", sim.name()), description)
            {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(simulator = %sim.name(), error = %e, "cannot reserve system log");
                    continue;
                }
            };
            let mut capture = self.deps.capture_log_factory.create(
                destination,
                sim.system_log(),
                true,
                description,
            );
            match capture.start_capture() {
                Ok(()) => captures.system_logs.push(capture),
                Err(e) => self
                    .main_log
                    .write_line(&format!("Failed to capture {} system log: {}", sim.name(), e)),
            }
        }

        if self.config.effective_clean_simulator_state() {
            for sim in simulators {
                if let Err(e) = sim.prepare(&self.main_log) {
                    self.main_log
                        .write_line(&format!("Failed to prepare simulator {}: {}", sim.name(), e));
                }
            }
        }

        if let Some(device) = device {
            match self.start_device_log(device) {
                Ok(capture) => captures.device_log = Some(capture),
                Err(e) => self
                    .main_log
                    .write_line(&format!("Failed to capture the device log: {}", e)),
            }
        }

        match captures.crash.start_capture() {
            Ok(()) => captures.crash_started = true,
            Err(e) => self
                .main_log
                .write_line(&format!("Failed to start crash report capture: {}", e)),
        }

        captures
    }

    fn start_device_log(
        &self,
        device: &ResolvedDevice,
    ) -> Result<Box<dyn SystemLogCapture>, RunnerError> {
        let device_log: SharedLog = self.logs.create(
            &timestamped_name(&format!("device-{}", device.name), "log"),
            "Device log",
            false,
        )?;
        let mut capture = self.deps.device_log_capturer_factory.create(
            Arc::clone(&self.main_log),
            device_log,
            &device.name,
        );
        capture
            .start_capture()
            .map_err(|e| RunnerError::InvalidOperation(e.to_string()))?;
        Ok(capture)
    }

    fn cleanup(
        &self,
        simulators: &[SharedSimulator],
        captures: ActiveCaptures,
        verdict: &RunVerdict,
    ) {
        if self.config.effective_clean_simulator_state() {
            for sim in simulators {
                if let Err(e) = sim.kill_everything(&self.main_log) {
                    self.main_log
                        .write_line(&format!("Failed to reset simulator {}: {}", sim.name(), e));
                }
            }
        }

        let ActiveCaptures {
            mut system_logs,
            device_log,
            ..
        } = captures;
        for capture in system_logs.iter_mut() {
            stop_and_register(capture.as_mut(), &self.logs);
        }
        if let Some(mut capture) = device_log {
            stop_and_register(capture.as_mut(), &self.logs);
        }

        let path: PathBuf = RunVerdict::path_for(self.logs.directory(), self.target);
        match verdict.write_to_file(&path) {
            Ok(()) => self.logs.register_upload(&path, "Verdict"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to write verdict"),
        }
        if let Err(e) = self.logs.write_index() {
            tracing::warn!(error = %e, "failed to write log index");
        }
        self.main_log.flush();
    }
}

/// Report the launch outcome once the app connects, the launch timeout
/// passes, or the listener is released.
fn spawn_launch_watcher(
    reporter: &Arc<dyn TestReporter>,
    listener: &ListenerGuard,
    launch_timeout: std::time::Duration,
) -> JoinHandle<()> {
    let reporter = Arc::clone(reporter);
    let signal = listener.connection();
    let token = reporter.cancellation_token();
    thread::spawn(move || {
        let outcome = signal.wait(launch_timeout, &token);
        reporter.launch_callback(outcome);
    })
}

