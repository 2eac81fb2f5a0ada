//! Device and simulator discovery
//!
//! The runner depends on the [`DeviceLoader`] and [`SimulatorLoader`]
//! contracts only. `simctl` and `devicectl` adapters back them on a real host.

mod devicectl;
mod simctl;

pub use devicectl::DevicectlDeviceLoader;
pub use simctl::{SimctlSimulator, SimctlSimulatorLoader};

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logs::SharedLog;
use crate::target::{DeviceClass, TestTarget};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    #[error("could not parse {source_name} output: {message}")]
    Parse { source_name: String, message: String },

    #[error("simulator operation failed for {udid}: {message}")]
    Simulator { udid: String, message: String },
}

/// A connected physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDevice {
    pub name: String,
    pub udid: String,
    pub device_class: DeviceClass,
    /// OS version as reported, e.g. `17.1`
    pub product_version: String,
    /// `Some(false)` excludes the device; unknown counts as usable
    pub usable_for_debugging: Option<bool>,
    /// Paired phone, for watches that report one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_udid: Option<String>,
}

impl HardwareDevice {
    pub fn is_usable(&self) -> bool {
        self.usable_for_debugging != Some(false)
    }

    pub fn os_version(&self) -> Option<OsVersion> {
        OsVersion::parse(&self.product_version)
    }
}

/// Dotted numeric version, compared component-wise.
#[derive(Debug, Clone)]
pub struct OsVersion(Vec<u32>);

impl OsVersion {
    /// `None` for anything that is not two to four dot-separated integers.
    pub fn parse(value: &str) -> Option<Self> {
        let parts = value
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        if !(2..=4).contains(&parts.len()) {
            return None;
        }
        Some(Self(parts))
    }
}

impl Ord for OsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for OsVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OsVersion {}

impl PartialOrd for OsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// Enumerates connected devices.
pub trait DeviceLoader: Send + Sync {
    fn connected_devices(&self) -> Result<Vec<HardwareDevice>, DiscoveryError>;

    /// The phone a watch is paired with, if it is connected.
    fn find_companion_device(
        &self,
        device: &HardwareDevice,
    ) -> Result<Option<HardwareDevice>, DiscoveryError>;
}

/// One simulator instance.
pub trait SimulatorDevice: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn udid(&self) -> &str;

    /// Host path of the simulator's system log.
    fn system_log(&self) -> PathBuf;

    /// Reset to a clean state before a run.
    fn prepare(&self, log: &SharedLog) -> Result<(), DiscoveryError>;

    /// Shut the simulator down and reset state after a run.
    fn kill_everything(&self, log: &SharedLog) -> Result<(), DiscoveryError>;
}

pub type SharedSimulator = Arc<dyn SimulatorDevice>;

/// Finds simulators for a target.
pub trait SimulatorLoader: Send + Sync {
    /// Primary simulator first, companions after. Empty when nothing matches.
    fn find(
        &self,
        target: TestTarget,
        log: &SharedLog,
    ) -> Result<Vec<SharedSimulator>, DiscoveryError>;
}

/// Run a discovery tool and return its stdout.
pub(crate) fn run_tool(program: &str, args: &[&str]) -> Result<Vec<u8>, DiscoveryError> {
    let command = format!("{} {}", program, args.join(" "));
    tracing::debug!(command = %command, "running discovery tool");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| DiscoveryError::Command {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(DiscoveryError::Command {
            command,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(OsVersion::parse("17.1"), Some(OsVersion(vec![17, 1])));
        assert_eq!(OsVersion::parse("9.0.2"), Some(OsVersion(vec![9, 0, 2])));
        assert_eq!(OsVersion::parse("unparsable"), None);
        assert_eq!(OsVersion::parse("17"), None);
        assert_eq!(OsVersion::parse(""), None);
    }

    #[test]
    fn test_version_ordering() {
        let v = |s: &str| OsVersion::parse(s).unwrap();
        assert!(v("9.0") < v("10.0"));
        assert_eq!(v("10.0"), v("10.0.0"));
        assert!(v("10.0.1") > v("10.0"));
        assert_eq!(v("16.4.1").to_string(), "16.4.1");
    }

    #[test]
    fn test_usable_defaults_to_true() {
        let mut device = HardwareDevice {
            name: "Lab".into(),
            udid: "u".into(),
            device_class: DeviceClass::IPhone,
            product_version: "17.0".into(),
            usable_for_debugging: None,
            companion_udid: None,
        };
        assert!(device.is_usable());
        device.usable_for_debugging = Some(false);
        assert!(!device.is_usable());
    }
}
