//! Launch helper command lines
//!
//! Pure construction: nothing here touches the device, the filesystem or
//! the network. Order matters and follows what mlaunch expects; see
//! [`MlaunchArguments::validate`].

use std::path::{Path, PathBuf};

use lane_mlaunch::{
    DeviceKind, MlaunchArgument, MlaunchArguments, ENV_AUTOEXIT, ENV_AUTOSTART,
    ENV_DISABLE_SYSTEM_PERMISSION_TESTS, ENV_ENABLE_NETWORK, ENV_HOSTNAME, ENV_HOSTPORT,
    ENV_LOG_FILE, ENV_TRANSPORT,
};

use crate::bundle::{AppBundleInformation, Extension};
use crate::error::RunnerError;
use crate::listener::ListenerTransport;
use crate::target::RunMode;

use super::resolve::ResolvedDevice;

pub fn install_arguments(
    verbosity: usize,
    app_path: &Path,
    device: &ResolvedDevice,
    run_mode: RunMode,
) -> MlaunchArguments {
    let mut args = MlaunchArguments::new();
    args.push_verbosity(verbosity);
    args.push(MlaunchArgument::InstallAppOnDevice(app_path.display().to_string()));
    args.push(MlaunchArgument::DeviceName(device.install_target().to_string()));
    if run_mode == RunMode::Watchos {
        args.push(MlaunchArgument::Device(DeviceKind::IosWatchos));
    }
    args
}

pub fn uninstall_arguments(
    verbosity: usize,
    bundle_identifier: &str,
    device: &ResolvedDevice,
) -> MlaunchArguments {
    let mut args = MlaunchArguments::new();
    args.push_verbosity(verbosity);
    args.push(MlaunchArgument::UninstallAppFromDevice(bundle_identifier.to_string()));
    args.push(MlaunchArgument::DeviceName(device.install_target().to_string()));
    args
}

/// The launch verb for the bundle: a plain app, or the host of an extension.
///
/// Fails for extension kinds that cannot be launched.
pub fn launch_descriptor(
    app: &AppBundleInformation,
    is_simulator: bool,
) -> Result<MlaunchArgument, RunnerError> {
    let launch_app_path = app.launch_app_path.display().to_string();
    match app.extension {
        None if is_simulator => Ok(MlaunchArgument::LaunchSimulator(launch_app_path)),
        None => Ok(MlaunchArgument::LaunchDevice(launch_app_path)),
        Some(Extension::TodayExtension) if is_simulator => {
            Ok(MlaunchArgument::LaunchSimulatorExtension {
                launch_app_path,
                bundle_id: app.bundle_identifier.clone(),
            })
        }
        Some(Extension::TodayExtension) => Ok(MlaunchArgument::LaunchDeviceExtension {
            launch_app_path,
            bundle_id: app.bundle_identifier.clone(),
        }),
        Some(other) => Err(RunnerError::UnsupportedExtension(other)),
    }
}

/// Where a simulator app's stdout and stderr go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRedirect {
    /// The terminal this process writes its stderr to
    Terminal(PathBuf),
    Files { stdout: PathBuf, stderr: PathBuf },
}

/// What the app runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    Simulator {
        udid: String,
        output: Option<OutputRedirect>,
    },
    Device {
        name: String,
    },
}

/// How the app reaches the result listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerEndpoint {
    pub transport: ListenerTransport,
    /// Host, or comma separated hosts, the app should try
    pub host: String,
    pub port: u16,
    /// Shared file for the file transport
    pub log_file: Option<PathBuf>,
}

/// Builds the full command line for a test run.
#[derive(Debug, Clone)]
pub struct LaunchArgumentBuilder {
    verbosity: usize,
    run_mode: RunMode,
    endpoint: ListenerEndpoint,
    descriptor: MlaunchArgument,
    target: LaunchTarget,
}

impl LaunchArgumentBuilder {
    pub fn new(
        verbosity: usize,
        run_mode: RunMode,
        endpoint: ListenerEndpoint,
        descriptor: MlaunchArgument,
        target: LaunchTarget,
    ) -> Self {
        Self {
            verbosity,
            run_mode,
            endpoint,
            descriptor,
            target,
        }
    }

    pub fn build(&self) -> MlaunchArguments {
        let mut args = MlaunchArguments::new();
        args.push_verbosity(self.verbosity);

        // Keeps the app from trying to reach an IDE
        args.push(MlaunchArgument::app_argument("-connection-mode"));
        args.push(MlaunchArgument::app_argument("none"));

        // App arguments and environment carry the same switches; the app reads either
        args.push(MlaunchArgument::prefixed_app_argument("-autostart"));
        args.push(MlaunchArgument::env(ENV_AUTOSTART, true));
        args.push(MlaunchArgument::prefixed_app_argument("-autoexit"));
        args.push(MlaunchArgument::env(ENV_AUTOEXIT, true));
        args.push(MlaunchArgument::prefixed_app_argument("-enablenetwork"));
        args.push(MlaunchArgument::env(ENV_ENABLE_NETWORK, true));

        // Permission dialogs cannot be answered headless on any platform
        args.push(MlaunchArgument::env(ENV_DISABLE_SYSTEM_PERMISSION_TESTS, 1));

        self.push_endpoint(&mut args);

        args.push(self.descriptor.clone());

        match &self.target {
            LaunchTarget::Simulator { udid, output } => {
                if self.run_mode != RunMode::Watchos {
                    match output {
                        Some(OutputRedirect::Terminal(tty)) => {
                            args.push(MlaunchArgument::SetStdout(tty.display().to_string()));
                            args.push(MlaunchArgument::SetStderr(tty.display().to_string()));
                        }
                        Some(OutputRedirect::Files { stdout, stderr }) => {
                            args.push(MlaunchArgument::SetStdout(stdout.display().to_string()));
                            args.push(MlaunchArgument::SetStderr(stderr.display().to_string()));
                        }
                        None => {}
                    }
                }
                args.push(MlaunchArgument::SimulatorUdid(udid.clone()));
            }
            LaunchTarget::Device { name } => {
                args.push(MlaunchArgument::DisableMemoryLimits);
                if self.run_mode == RunMode::Watchos {
                    // Waiting for exit lets watchOS background the app
                    args.push(MlaunchArgument::AttachNativeDebugger);
                } else {
                    args.push(MlaunchArgument::WaitForExit);
                }
                args.push(MlaunchArgument::DeviceName(name.clone()));
            }
        }

        args
    }

    fn push_endpoint(&self, args: &mut MlaunchArguments) {
        let endpoint = &self.endpoint;
        args.push(MlaunchArgument::prefixed_app_argument(format!(
            "-hostname:{}",
            endpoint.host
        )));
        args.push(MlaunchArgument::env(ENV_HOSTNAME, &endpoint.host));

        args.push(MlaunchArgument::prefixed_app_argument(format!(
            "-transport:{}",
            endpoint.transport
        )));
        args.push(MlaunchArgument::env(ENV_TRANSPORT, endpoint.transport.env_value()));

        if endpoint.transport == ListenerTransport::File {
            if let Some(ref file) = endpoint.log_file {
                args.push(MlaunchArgument::env(ENV_LOG_FILE, file.display()));
            }
        }

        args.push(MlaunchArgument::prefixed_app_argument(format!(
            "-hostport:{}",
            endpoint.port
        )));
        args.push(MlaunchArgument::env(ENV_HOSTPORT, endpoint.port));
    }
}
