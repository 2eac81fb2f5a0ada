//! Simulator discovery through `xcrun simctl`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::{
    run_tool, DiscoveryError, OsVersion, SharedSimulator, SimulatorDevice, SimulatorLoader,
};
use crate::logs::SharedLog;
use crate::target::{RunMode, TestTarget};

const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SimctlList {
    #[serde(default)]
    runtimes: Vec<Runtime>,
    #[serde(default)]
    devices: BTreeMap<String, Vec<ListedDevice>>,
    #[serde(default)]
    pairs: BTreeMap<String, Pair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Runtime {
    identifier: String,
    version: String,
    #[serde(default)]
    is_available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedDevice {
    udid: String,
    name: String,
    #[serde(default)]
    is_available: bool,
    #[serde(default)]
    device_type_identifier: String,
    #[serde(default)]
    log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Pair {
    watch: PairMember,
    phone: PairMember,
}

#[derive(Debug, Deserialize)]
struct PairMember {
    udid: String,
}

fn runtime_family(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Ios => "iOS-",
        RunMode::Tvos => "tvOS-",
        RunMode::Watchos => "watchOS-",
    }
}

fn device_type_hint(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Ios => "iPhone",
        RunMode::Tvos => "Apple-TV",
        RunMode::Watchos => "Apple-Watch",
    }
}

impl SimctlList {
    pub(crate) fn parse(json: &[u8]) -> Result<Self, DiscoveryError> {
        serde_json::from_slice(json).map_err(|e| DiscoveryError::Parse {
            source_name: "simctl list".to_string(),
            message: e.to_string(),
        })
    }

    /// Available runtimes of the family, newest first.
    fn runtimes_for(&self, mode: RunMode) -> Vec<&Runtime> {
        let prefix = format!("{}{}", RUNTIME_PREFIX, runtime_family(mode));
        let mut runtimes: Vec<&Runtime> = self
            .runtimes
            .iter()
            .filter(|r| r.is_available && r.identifier.starts_with(&prefix))
            .collect();
        runtimes.sort_by(|a, b| OsVersion::parse(&b.version).cmp(&OsVersion::parse(&a.version)));
        runtimes
    }

    fn available_devices(&self, runtime: &Runtime, mode: RunMode) -> Vec<&ListedDevice> {
        let devices: Vec<&ListedDevice> = self
            .devices
            .get(&runtime.identifier)
            .map(|d| d.iter().filter(|d| d.is_available).collect())
            .unwrap_or_default();
        let hint = device_type_hint(mode);
        let preferred: Vec<&ListedDevice> = devices
            .iter()
            .copied()
            .filter(|d| d.device_type_identifier.contains(hint))
            .collect();
        if preferred.is_empty() {
            devices
        } else {
            preferred
        }
    }

    fn paired_phone(&self, watch_udid: &str) -> Option<&ListedDevice> {
        let phone_udid = self
            .pairs
            .values()
            .find(|p| p.watch.udid == watch_udid)
            .map(|p| p.phone.udid.as_str())?;
        self.devices
            .values()
            .flatten()
            .find(|d| d.udid == phone_udid && d.is_available)
    }

    /// Primary simulator first; a watch is followed by its paired phone.
    pub(crate) fn select(&self, target: TestTarget) -> Vec<SimctlSimulator> {
        let mode = target.run_mode();
        for runtime in self.runtimes_for(mode) {
            let candidates = self.available_devices(runtime, mode);
            if mode == RunMode::Watchos {
                for watch in candidates {
                    if let Some(phone) = self.paired_phone(&watch.udid) {
                        return vec![
                            SimctlSimulator::from_listed(watch),
                            SimctlSimulator::from_listed(phone),
                        ];
                    }
                }
            } else if let Some(first) = candidates.first() {
                return vec![SimctlSimulator::from_listed(first)];
            }
        }
        Vec::new()
    }
}

/// A simulator known to simctl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimctlSimulator {
    name: String,
    udid: String,
    log_directory: PathBuf,
}

impl SimctlSimulator {
    pub fn new(name: impl Into<String>, udid: impl Into<String>, log_directory: PathBuf) -> Self {
        Self {
            name: name.into(),
            udid: udid.into(),
            log_directory,
        }
    }

    fn from_listed(device: &ListedDevice) -> Self {
        let log_directory = device.log_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_default()
                .join("Library/Logs/CoreSimulator")
                .join(&device.udid)
        });
        Self::new(device.name.clone(), device.udid.clone(), log_directory)
    }

    fn simctl(
        &self,
        log: &SharedLog,
        verb: &str,
        tolerate_failure: bool,
    ) -> Result<(), DiscoveryError> {
        log.write_line(&format!("xcrun simctl {} {}", verb, self.udid));
        match run_tool("xcrun", &["simctl", verb, &self.udid]) {
            Ok(_) => Ok(()),
            Err(e) if tolerate_failure => {
                log.write_line(&format!("Ignoring failure: {}", e));
                Ok(())
            }
            Err(e) => Err(DiscoveryError::Simulator {
                udid: self.udid.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl SimulatorDevice for SimctlSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn udid(&self) -> &str {
        &self.udid
    }

    fn system_log(&self) -> PathBuf {
        self.log_directory.join("system.log")
    }

    fn prepare(&self, log: &SharedLog) -> Result<(), DiscoveryError> {
        // Already shut down is fine
        self.simctl(log, "shutdown", true)?;
        self.simctl(log, "erase", false)?;
        self.simctl(log, "boot", false)
    }

    fn kill_everything(&self, log: &SharedLog) -> Result<(), DiscoveryError> {
        self.simctl(log, "shutdown", true)?;
        self.simctl(log, "erase", false)
    }
}

/// Loads simulators from `xcrun simctl list --json`.
#[derive(Debug, Default, Clone)]
pub struct SimctlSimulatorLoader;

impl SimctlSimulatorLoader {
    pub fn new() -> Self {
        Self
    }
}

impl SimulatorLoader for SimctlSimulatorLoader {
    fn find(
        &self,
        target: TestTarget,
        log: &SharedLog,
    ) -> Result<Vec<SharedSimulator>, DiscoveryError> {
        let json = run_tool("xcrun", &["simctl", "list", "--json"])?;
        let list = SimctlList::parse(&json)?;
        let selected = list.select(target);

        for sim in &selected {
            log.write_line(&format!("Found simulator '{}' ({}) for {}", sim.name, sim.udid, target));
        }
        Ok(selected
            .into_iter()
            .map(|s| Arc::new(s) as SharedSimulator)
            .collect())
    }
}
