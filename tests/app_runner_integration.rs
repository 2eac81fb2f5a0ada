//! AppRunner integration tests
//!
//! Drive complete runs through `AppRunner` with in-process fakes for the
//! launch helper, discovery, listener, captures and crash reporter. The
//! reporter and, for the end-to-end test, the file listener are the real
//! implementations.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use device_run_lane::capture::{
    CaptureError, CaptureLogFactory, DeviceLogCapturerFactory, SystemLogCapture,
};
use device_run_lane::crash::{CrashSnapshotReporter, CrashSnapshotReporterFactory};
use device_run_lane::hardware::{
    DeviceLoader, DiscoveryError, HardwareDevice, SharedSimulator, SimulatorDevice,
    SimulatorLoader,
};
use device_run_lane::listener::{
    DefaultListenerFactory, Listener, ListenerError, ListenerFactory, ListenerRequest,
    ListenerSetup, ListenerTransport,
};
use device_run_lane::logs::{Logs, MemoryLog, SharedLog};
use device_run_lane::process::{
    ProcessError, ProcessExecutionResult, ProcessManager, RunningProcess,
};
use device_run_lane::reporter::ReconcilingReporterFactory;
use device_run_lane::{
    AppBundleInformation, AppRunner, AppRunnerDeps, CancellationToken, ConnectionSignal,
    DeviceClass, RunPhase, RunVerdict, RunnerConfig, RunnerError, TestExecutingResult,
    TestTarget,
};
use lane_mlaunch::{MlaunchArguments, ENV_LOG_FILE};
use tempfile::TempDir;

// =============================================================================
// Fakes
// =============================================================================

/// Shared record of what the collaborators were asked to do.
#[derive(Debug, Clone, Default)]
struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn contains(&self, event: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == event)
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }
}

enum Behavior {
    Exit(i32),
    /// Block until the cancellation token fires
    Hang,
    /// Append lines to the shared result file, then exit
    WriteResults { lines: Vec<&'static str>, exit: i32 },
}

struct FakeProcesses {
    behavior: Behavior,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeProcesses {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessManager for FakeProcesses {
    fn execute_command(
        &self,
        args: &MlaunchArguments,
        _log: SharedLog,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessExecutionResult, ProcessError> {
        self.calls.lock().unwrap().push(args.to_argv());
        match &self.behavior {
            Behavior::Exit(code) => Ok(ProcessExecutionResult::exited(*code)),
            Behavior::Hang => {
                let started = std::time::Instant::now();
                while !cancel.wait_timeout(Duration::from_millis(20)) {
                    if started.elapsed() >= timeout {
                        break;
                    }
                }
                Ok(ProcessExecutionResult::timed_out(143))
            }
            Behavior::WriteResults { lines, exit } => {
                let path = args.env_value(ENV_LOG_FILE).expect("file transport in use");
                let mut file = OpenOptions::new().append(true).open(path).unwrap();
                for line in lines {
                    writeln!(file, "{}", line).unwrap();
                }
                Ok(ProcessExecutionResult::exited(*exit))
            }
        }
    }

    fn spawn_command(
        &self,
        args: &MlaunchArguments,
        _log: SharedLog,
    ) -> Result<Box<dyn RunningProcess>, ProcessError> {
        self.calls.lock().unwrap().push(args.to_argv());
        Err(ProcessError::SpawnFailed {
            program: "mlaunch".to_string(),
            message: "not supported by the fake".to_string(),
        })
    }
}

#[derive(Debug)]
struct FakeSimulator {
    name: String,
    udid: String,
    system_log: PathBuf,
    events: Events,
}

impl SimulatorDevice for FakeSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn udid(&self) -> &str {
        &self.udid
    }

    fn system_log(&self) -> PathBuf {
        self.system_log.clone()
    }

    fn prepare(&self, _log: &SharedLog) -> Result<(), DiscoveryError> {
        self.events.push(format!("prepare {}", self.name));
        Ok(())
    }

    fn kill_everything(&self, _log: &SharedLog) -> Result<(), DiscoveryError> {
        self.events.push(format!("kill {}", self.name));
        Ok(())
    }
}

struct FakeSimulatorLoader {
    simulators: Vec<SharedSimulator>,
    calls: Arc<AtomicUsize>,
}

impl SimulatorLoader for FakeSimulatorLoader {
    fn find(
        &self,
        _target: TestTarget,
        _log: &SharedLog,
    ) -> Result<Vec<SharedSimulator>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.simulators.clone())
    }
}

struct FakeDeviceLoader {
    devices: Vec<HardwareDevice>,
}

impl DeviceLoader for FakeDeviceLoader {
    fn connected_devices(&self) -> Result<Vec<HardwareDevice>, DiscoveryError> {
        Ok(self.devices.clone())
    }

    fn find_companion_device(
        &self,
        _device: &HardwareDevice,
    ) -> Result<Option<HardwareDevice>, DiscoveryError> {
        Ok(None)
    }
}

/// A listener the app never connects to.
struct FakeListener {
    events: Events,
    connection: ConnectionSignal,
}

impl Listener for FakeListener {
    fn initialize(&mut self) -> Result<u16, ListenerError> {
        self.events.push("listener initialized");
        Ok(50123)
    }

    fn start(&mut self) -> Result<(), ListenerError> {
        self.events.push("listener started");
        Ok(())
    }

    fn connection(&self) -> ConnectionSignal {
        self.connection.clone()
    }

    fn cancel(&mut self) {
        self.events.push("listener cancelled");
    }

    fn dispose(&mut self) {
        self.events.push("listener disposed");
    }
}

struct FakeListenerFactory {
    events: Events,
}

impl ListenerFactory for FakeListenerFactory {
    fn create(
        &self,
        _request: &ListenerRequest,
        _main_log: SharedLog,
        _test_log: SharedLog,
    ) -> Result<ListenerSetup, ListenerError> {
        Ok(ListenerSetup {
            transport: ListenerTransport::Tcp,
            listener: Box::new(FakeListener {
                events: self.events.clone(),
                connection: ConnectionSignal::new(),
            }),
            temp_file: None,
        })
    }
}

struct FakeCapture {
    path: PathBuf,
    description: String,
    events: Events,
}

impl SystemLogCapture for FakeCapture {
    fn start_capture(&mut self) -> Result<(), CaptureError> {
        self.events.push(format!("capture started: {}", self.description));
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), CaptureError> {
        self.events.push(format!("capture stopped: {}", self.description));
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn description(&self) -> &str {
        &self.description
    }
}

struct FakeCaptureFactory {
    events: Events,
}

impl CaptureLogFactory for FakeCaptureFactory {
    fn create(
        &self,
        destination: PathBuf,
        _system_log: PathBuf,
        _entire_file: bool,
        description: &str,
    ) -> Box<dyn SystemLogCapture> {
        Box::new(FakeCapture {
            path: destination,
            description: description.to_string(),
            events: self.events.clone(),
        })
    }
}

impl DeviceLogCapturerFactory for FakeCaptureFactory {
    fn create(
        &self,
        _main_log: SharedLog,
        _device_log: SharedLog,
        device_name: &str,
    ) -> Box<dyn SystemLogCapture> {
        Box::new(FakeCapture {
            path: PathBuf::new(),
            description: format!("device log {}", device_name),
            events: self.events.clone(),
        })
    }
}

struct FakeCrash {
    events: Events,
    reports: Vec<PathBuf>,
}

impl CrashSnapshotReporter for FakeCrash {
    fn start_capture(&mut self) -> Result<(), CaptureError> {
        self.events.push("crash started");
        Ok(())
    }

    fn end_capture(&mut self, _wait: Duration) -> Result<Vec<PathBuf>, CaptureError> {
        self.events.push("crash ended");
        Ok(self.reports.clone())
    }
}

struct FakeCrashFactory {
    events: Events,
    reports: Vec<PathBuf>,
}

impl CrashSnapshotReporterFactory for FakeCrashFactory {
    fn create(
        &self,
        _main_log: SharedLog,
        _logs: Arc<Logs>,
        _is_device: bool,
        _device_name: &str,
    ) -> Box<dyn CrashSnapshotReporter> {
        Box::new(FakeCrash {
            events: self.events.clone(),
            reports: self.reports.clone(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    dir: TempDir,
    events: Events,
    processes: Arc<FakeProcesses>,
    simulator_loads: Arc<AtomicUsize>,
    devices: Vec<HardwareDevice>,
    config: RunnerConfig,
    file_transport: bool,
    crash_reports: Vec<PathBuf>,
}

impl Harness {
    fn new(behavior: Behavior) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = RunnerConfig::default();
        config.output_directory = dir.path().join("output");
        config.timeouts.crash_report_wait_seconds = 0;
        Self {
            dir,
            events: Events::default(),
            processes: FakeProcesses::new(behavior),
            simulator_loads: Arc::new(AtomicUsize::new(0)),
            devices: Vec::new(),
            config,
            file_transport: false,
            crash_reports: Vec::new(),
        }
    }

    fn with_devices(mut self, devices: Vec<HardwareDevice>) -> Self {
        self.devices = devices;
        self
    }

    fn with_file_transport(mut self) -> Self {
        self.file_transport = true;
        self.config.listener.use_file_transport = true;
        self
    }

    fn simulator(&self, name: &str) -> SharedSimulator {
        Arc::new(FakeSimulator {
            name: name.to_string(),
            udid: format!("{}-UDID", name.to_uppercase()),
            system_log: self.dir.path().join(format!("{}-system.log", name)),
            events: self.events.clone(),
        })
    }

    fn runner(&self, target: TestTarget) -> AppRunner {
        let listener_factory: Box<dyn ListenerFactory> = if self.file_transport {
            Box::new(DefaultListenerFactory::with_scratch_dir(self.dir.path().join("scratch")))
        } else {
            Box::new(FakeListenerFactory {
                events: self.events.clone(),
            })
        };
        let deps = AppRunnerDeps {
            processes: self.processes.clone(),
            simulator_loader: Box::new(FakeSimulatorLoader {
                simulators: vec![self.simulator("primary")],
                calls: Arc::clone(&self.simulator_loads),
            }),
            device_loader: Box::new(FakeDeviceLoader {
                devices: self.devices.clone(),
            }),
            listener_factory,
            crash_reporter_factory: Box::new(FakeCrashFactory {
                events: self.events.clone(),
                reports: self.crash_reports.clone(),
            }),
            capture_log_factory: Box::new(FakeCaptureFactory {
                events: self.events.clone(),
            }),
            device_log_capturer_factory: Box::new(FakeCaptureFactory {
                events: self.events.clone(),
            }),
            reporter_factory: Box::new(ReconcilingReporterFactory),
        };

        let app = AppBundleInformation::from_path(self.dir.path().join("Tests.app"), None)
            .with_bundle_identifier("com.example.tests");
        let logs = Arc::new(Logs::new(self.config.output_directory.clone()));
        let main_log: SharedLog = Arc::new(MemoryLog::new("main"));
        AppRunner::new(deps, self.config.clone(), target, app, logs, main_log)
    }
}

fn device(name: &str, class: DeviceClass, version: &str) -> HardwareDevice {
    HardwareDevice {
        name: name.to_string(),
        udid: format!("udid-{}", name),
        device_class: class,
        product_version: version.to_string(),
        usable_for_debugging: None,
        companion_udid: None,
    }
}

fn argv_has(argv: &[String], token: &str) -> bool {
    argv.iter().any(|a| a == token)
}

// =============================================================================
// Target resolution
// =============================================================================

#[test]
fn test_no_matching_device_aborts_before_any_process() {
    let harness = Harness::new(Behavior::Exit(0))
        .with_devices(vec![device("living room", DeviceClass::AppleTv, "17.0")]);
    let mut runner = harness.runner(TestTarget::IosDevice);

    let err = runner.run().unwrap_err();
    assert!(matches!(err, RunnerError::NoDeviceFound { .. }));
    assert!(harness.processes.calls().is_empty());
    assert!(runner.phases().phase().is_terminal());
    assert!(!runner.phases().visited(RunPhase::StartCapture));
    assert!(!harness.events.contains("crash started"));

    let err = runner.install(&CancellationToken::new()).unwrap_err();
    assert!(err.is_resolution());
    assert!(harness.processes.calls().is_empty());
}

#[test]
fn test_lowest_version_device_is_used() {
    let harness = Harness::new(Behavior::Exit(0)).with_devices(vec![
        device("ten", DeviceClass::IPhone, "10.0"),
        device("nine", DeviceClass::IPhone, "9.0"),
        device("odd", DeviceClass::IPhone, "unparsable"),
    ]);
    let mut runner = harness.runner(TestTarget::IosDevice);

    let verdict = runner.run().unwrap();
    assert_eq!(verdict.result, TestExecutingResult::Passed);

    let calls = harness.processes.calls();
    assert_eq!(calls.len(), 1);
    let argv = &calls[0];
    assert!(argv_has(argv, "--devname=nine"));
    assert!(argv_has(argv, "--wait-for-exit"));
    assert!(argv_has(argv, "--disable-memory-limits"));
    assert_eq!(runner.context().device().unwrap().name, "nine");

    // Device log is torn down before crash capture ends
    let stopped = harness.events.position("capture stopped: device log nine").unwrap();
    let crash_end = harness.events.position("crash ended").unwrap();
    assert!(stopped < crash_end);
}

#[test]
fn test_resolution_happens_once_per_runner() {
    let harness = Harness::new(Behavior::Exit(0));
    let mut runner = harness.runner(TestTarget::IosSimulator64);

    runner.run().unwrap();
    let first = runner.context().simulators().unwrap()[0].udid().to_string();
    runner.run().unwrap();
    let second = runner.context().simulators().unwrap()[0].udid().to_string();

    assert_eq!(first, second);
    assert_eq!(harness.simulator_loads.load(Ordering::SeqCst), 1);
    assert_eq!(harness.processes.calls().len(), 2);
}

#[test]
fn test_injected_simulators_skip_discovery() {
    let harness = Harness::new(Behavior::Exit(0));
    let booted = harness.simulator("booted");
    let mut runner = harness
        .runner(TestTarget::IosSimulator64)
        .with_simulators(vec![booted]);

    runner.run().unwrap();
    assert_eq!(harness.simulator_loads.load(Ordering::SeqCst), 0);
    assert!(argv_has(&harness.processes.calls()[0], "--device=:v2:udid=BOOTED-UDID"));
}

// =============================================================================
// Install / uninstall
// =============================================================================

#[test]
fn test_install_on_simulator_is_rejected() {
    let harness = Harness::new(Behavior::Exit(0));
    let mut runner = harness.runner(TestTarget::IosSimulator64);

    let err = runner.install(&CancellationToken::new()).unwrap_err();
    assert!(matches!(err, RunnerError::InvalidOperation(_)));
    assert_eq!(err.to_string(), "Installing to a simulator is not supported.");

    let err = runner.uninstall().unwrap_err();
    assert_eq!(err.to_string(), "Uninstalling from a simulator is not supported.");

    assert!(harness.processes.calls().is_empty());
    assert_eq!(harness.simulator_loads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_install_returns_helper_exit_code() {
    let mut harness = Harness::new(Behavior::Exit(5));
    harness.config.device.name = Some("Lab iPhone".to_string());
    let mut runner = harness.runner(TestTarget::IosDevice);

    let result = runner.install(&CancellationToken::new()).unwrap();
    assert_eq!(result.exit_code, 5);
    assert!(!result.succeeded());

    let argv = &harness.processes.calls()[0];
    assert!(argv.iter().any(|a| a.starts_with("--installdev=")));
    assert!(argv_has(argv, "--devname=Lab iPhone"));
}

#[test]
fn test_uninstall_uses_bundle_identifier() {
    let mut harness = Harness::new(Behavior::Exit(0));
    harness.config.device.name = Some("Lab iPhone".to_string());
    let mut runner = harness.runner(TestTarget::IosDevice);

    assert!(runner.uninstall().unwrap().succeeded());
    let argv = &harness.processes.calls()[0];
    assert!(argv_has(argv, "--uninstalldevbundleid=com.example.tests"));
}

// =============================================================================
// Supervision and reconciliation
// =============================================================================

#[test]
fn test_run_timeout_still_cleans_up() {
    let mut harness = Harness::new(Behavior::Hang);
    // Roughly 300ms
    harness.config.timeouts.run_minutes = 0.005;
    harness.config.simulator.ensure_clean_state = true;
    let mut runner = harness.runner(TestTarget::IosSimulator64);

    let verdict = runner.run().unwrap();
    assert_eq!(verdict.result, TestExecutingResult::TimedOut);
    assert_eq!(verdict.status_code(), 1);

    assert!(harness.events.contains("listener cancelled"));
    assert!(harness.events.contains("listener disposed"));
    assert!(harness.events.contains("capture stopped: SystemLog"));
    assert!(harness.events.contains("crash ended"));
    assert!(harness.events.contains("prepare primary"));
    assert!(harness.events.contains("kill primary"));
    assert!(runner.phases().visited(RunPhase::Cleanup));
    assert!(runner.phases().phase().is_terminal());

    let verdict_path = RunVerdict::path_for(&harness.config.output_directory, TestTarget::IosSimulator64);
    assert_eq!(RunVerdict::from_file(&verdict_path).unwrap(), verdict);
}

#[test]
fn test_no_connection_falls_back_to_exit_code() {
    let harness = Harness::new(Behavior::Exit(3));
    let mut runner = harness.runner(TestTarget::IosSimulator64);

    let verdict = runner.run().unwrap();
    assert_eq!(verdict.result, TestExecutingResult::Failed);
    assert_eq!(verdict.exit_code, 3);
    assert_eq!(runner.result(), Some(TestExecutingResult::Failed));
    let message = runner.failure_message().unwrap();
    assert!(message.contains("exited with code 3"));
    assert!(message.contains("never connected"));

    let harness = Harness::new(Behavior::Exit(0));
    let mut runner = harness.runner(TestTarget::IosSimulator64);
    assert_eq!(runner.run().unwrap().result, TestExecutingResult::Passed);
}

#[test]
fn test_crash_without_results_is_crashed() {
    let mut harness = Harness::new(Behavior::Exit(134));
    harness.crash_reports = vec![harness.dir.path().join("Tests-2024.ips")];
    let mut runner = harness.runner(TestTarget::IosSimulator64);

    let verdict = runner.run().unwrap();
    assert_eq!(verdict.result, TestExecutingResult::Crashed);
    assert_eq!(verdict.crash_reports.len(), 1);
}

#[test]
fn test_watch_simulator_launch_arguments() {
    let harness = Harness::new(Behavior::Exit(0));
    let mut runner = harness.runner(TestTarget::WatchosSimulator);
    runner.run().unwrap();

    let argv = &harness.processes.calls()[0];
    assert!(argv_has(argv, "--device=:v2:udid=PRIMARY-UDID"));
    assert!(!argv.iter().any(|a| a.starts_with("--stdout=")));
    assert!(argv_has(argv, "--setenv=DISABLE_SYSTEM_PERMISSION_TESTS=1"));
    assert!(argv_has(argv, "--setenv=NUNIT_HOSTNAME=127.0.0.1"));
    assert!(argv_has(argv, "--setenv=NUNIT_HOSTPORT=50123"));
}

#[test]
fn test_file_transport_end_to_end() {
    let harness = Harness::new(Behavior::WriteResults {
        lines: vec![
            r#"<test-suite name="Suite" result="Failed"/>"#,
            r#"<test name="Tests.Adds" result="Pass"/>"#,
            r#"<test name="Tests.Divides" result="Fail"/>"#,
        ],
        exit: 1,
    })
    .with_file_transport();
    let mut runner = harness.runner(TestTarget::IosSimulator64);

    let verdict = runner.run().unwrap();
    let counts = verdict.counts.expect("counts were reported");
    assert_eq!(counts.passed, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(verdict.result, TestExecutingResult::Failed);
    assert_eq!(verdict.status_code(), 1);

    let argv = &harness.processes.calls()[0];
    assert!(argv_has(argv, "--setenv=NUNIT_TRANSPORT=FILE"));

    // The shared file is removed when the listener is released
    let remaining = std::fs::read_dir(harness.dir.path().join("scratch"))
        .unwrap()
        .count();
    assert_eq!(remaining, 0);
}
