//! Individual mlaunch arguments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device family hint passed with `--device` during installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// A watch app installed through its paired phone.
    IosWatchos,
}

impl DeviceKind {
    fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::IosWatchos => "ios,watchos",
        }
    }
}

/// A single typed mlaunch argument.
///
/// Some arguments render to more than one argv token (the extension launch
/// descriptors, app arguments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MlaunchArgument {
    /// `-v`, repeated to raise verbosity
    Verbosity,
    /// `--sdkroot <path>`
    SdkRoot(String),
    /// `--installdev=<app path>`
    InstallAppOnDevice(String),
    /// `--uninstalldevbundleid=<bundle id>`
    UninstallAppFromDevice(String),
    /// `--devname=<device name>`
    DeviceName(String),
    /// `--device=<kind>`
    Device(DeviceKind),
    /// `--device=:v2:udid=<udid>`
    SimulatorUdid(String),
    /// `--argument <value>`; app arguments carry the `-app-arg:` prefix
    SetAppArgument { value: String, app_arg: bool },
    /// `--setenv=<name>=<value>`
    SetEnvVariable { name: String, value: String },
    /// `--stdout=<path>`
    SetStdout(String),
    /// `--stderr=<path>`
    SetStderr(String),
    /// `--launchsim=<app path>`
    LaunchSimulator(String),
    /// `--launchdev=<app path>`
    LaunchDevice(String),
    /// Launch a today extension on a simulator, observing the host app
    LaunchSimulatorExtension { launch_app_path: String, bundle_id: String },
    /// Launch a today extension on a device, observing the host app
    LaunchDeviceExtension { launch_app_path: String, bundle_id: String },
    /// `--disable-memory-limits`
    DisableMemoryLimits,
    /// `--wait-for-exit`
    WaitForExit,
    /// `--attach-native-debugger`
    AttachNativeDebugger,
    /// `--logdev`
    LogDevice,
    /// `--list-crash-reports=<output file>`
    ListCrashReports(String),
    /// `--download-crash-report=<report name>`
    DownloadCrashReport(String),
    /// `--download-crash-report-to=<destination>`
    DownloadCrashReportTo(String),
}

impl MlaunchArgument {
    /// App argument without the `-app-arg:` prefix.
    pub fn app_argument(value: impl Into<String>) -> Self {
        MlaunchArgument::SetAppArgument {
            value: value.into(),
            app_arg: false,
        }
    }

    /// App argument forwarded with the `-app-arg:` prefix.
    pub fn prefixed_app_argument(value: impl Into<String>) -> Self {
        MlaunchArgument::SetAppArgument {
            value: value.into(),
            app_arg: true,
        }
    }

    pub fn env(name: impl Into<String>, value: impl ToString) -> Self {
        MlaunchArgument::SetEnvVariable {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// Render to argv tokens.
    pub fn to_tokens(&self) -> Vec<String> {
        match self {
            MlaunchArgument::Verbosity => vec!["-v".to_string()],
            MlaunchArgument::SdkRoot(path) => vec!["--sdkroot".to_string(), path.clone()],
            MlaunchArgument::InstallAppOnDevice(path) => vec![format!("--installdev={}", path)],
            MlaunchArgument::UninstallAppFromDevice(id) => {
                vec![format!("--uninstalldevbundleid={}", id)]
            }
            MlaunchArgument::DeviceName(name) => vec![format!("--devname={}", name)],
            MlaunchArgument::Device(kind) => vec![format!("--device={}", kind.as_str())],
            MlaunchArgument::SimulatorUdid(udid) => vec![format!("--device=:v2:udid={}", udid)],
            MlaunchArgument::SetAppArgument { value, app_arg } => {
                let value = if *app_arg {
                    format!("-app-arg:{}", value)
                } else {
                    value.clone()
                };
                vec!["--argument".to_string(), value]
            }
            MlaunchArgument::SetEnvVariable { name, value } => {
                vec![format!("--setenv={}={}", name, value)]
            }
            MlaunchArgument::SetStdout(path) => vec![format!("--stdout={}", path)],
            MlaunchArgument::SetStderr(path) => vec![format!("--stderr={}", path)],
            MlaunchArgument::LaunchSimulator(path) => vec![format!("--launchsim={}", path)],
            MlaunchArgument::LaunchDevice(path) => vec![format!("--launchdev={}", path)],
            MlaunchArgument::LaunchSimulatorExtension {
                launch_app_path,
                bundle_id,
            } => vec![
                format!("--launchsimbundleid=todayviewforextensions:{}", bundle_id),
                format!("--observe-extension={}", launch_app_path),
            ],
            MlaunchArgument::LaunchDeviceExtension {
                launch_app_path,
                bundle_id,
            } => vec![
                format!("--launchdevbundleid=todayviewforextensions:{}", bundle_id),
                format!("--observe-extension={}", launch_app_path),
            ],
            MlaunchArgument::DisableMemoryLimits => vec!["--disable-memory-limits".to_string()],
            MlaunchArgument::WaitForExit => vec!["--wait-for-exit".to_string()],
            MlaunchArgument::AttachNativeDebugger => vec!["--attach-native-debugger".to_string()],
            MlaunchArgument::LogDevice => vec!["--logdev".to_string()],
            MlaunchArgument::ListCrashReports(path) => {
                vec![format!("--list-crash-reports={}", path)]
            }
            MlaunchArgument::DownloadCrashReport(name) => {
                vec![format!("--download-crash-report={}", name)]
            }
            MlaunchArgument::DownloadCrashReportTo(path) => {
                vec![format!("--download-crash-report-to={}", path)]
            }
        }
    }

    /// Whether this argument is a command verb (what mlaunch should do).
    pub fn is_verb(&self) -> bool {
        matches!(
            self,
            MlaunchArgument::InstallAppOnDevice(_)
                | MlaunchArgument::UninstallAppFromDevice(_)
                | MlaunchArgument::LogDevice
                | MlaunchArgument::ListCrashReports(_)
                | MlaunchArgument::DownloadCrashReport(_)
        ) || self.is_launch_verb()
    }

    /// Whether this argument launches an app or extension.
    pub fn is_launch_verb(&self) -> bool {
        matches!(
            self,
            MlaunchArgument::LaunchSimulator(_)
                | MlaunchArgument::LaunchDevice(_)
                | MlaunchArgument::LaunchSimulatorExtension { .. }
                | MlaunchArgument::LaunchDeviceExtension { .. }
        )
    }

    /// Whether this argument configures the launched app's process state.
    pub fn is_app_setup(&self) -> bool {
        matches!(
            self,
            MlaunchArgument::SetAppArgument { .. } | MlaunchArgument::SetEnvVariable { .. }
        )
    }
}

impl fmt::Display for MlaunchArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tokens().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_argument_prefix() {
        let plain = MlaunchArgument::app_argument("-connection-mode");
        assert_eq!(plain.to_tokens(), vec!["--argument", "-connection-mode"]);

        let prefixed = MlaunchArgument::prefixed_app_argument("-autostart");
        assert_eq!(prefixed.to_tokens(), vec!["--argument", "-app-arg:-autostart"]);
    }

    #[test]
    fn test_env_rendering() {
        let arg = MlaunchArgument::env("NUNIT_HOSTPORT", 51234);
        assert_eq!(arg.to_tokens(), vec!["--setenv=NUNIT_HOSTPORT=51234"]);
    }

    #[test]
    fn test_extension_launch_renders_two_tokens() {
        let arg = MlaunchArgument::LaunchDeviceExtension {
            launch_app_path: "/tmp/Host.app".to_string(),
            bundle_id: "com.example.today".to_string(),
        };
        let tokens = arg.to_tokens();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], "--launchdevbundleid=todayviewforextensions:com.example.today");
        assert_eq!(tokens[1], "--observe-extension=/tmp/Host.app");
        assert!(arg.is_launch_verb());
    }

    #[test]
    fn test_simulator_udid() {
        let arg = MlaunchArgument::SimulatorUdid("ABC-123".to_string());
        assert_eq!(arg.to_string(), "--device=:v2:udid=ABC-123");
        assert!(!arg.is_verb());
    }

    #[test]
    fn test_watch_device_kind() {
        let arg = MlaunchArgument::Device(DeviceKind::IosWatchos);
        assert_eq!(arg.to_string(), "--device=ios,watchos");
    }
}
