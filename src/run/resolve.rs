//! Target resolution
//!
//! Picks the concrete device or simulators a run uses. Whatever is resolved
//! is cached in a [`ResolvedExecutionContext`] and never re-resolved.

use serde::Serialize;

use crate::error::RunnerError;
use crate::hardware::{DeviceLoader, HardwareDevice, SharedSimulator, SimulatorLoader};
use crate::logs::SharedLog;
use crate::target::{RunMode, TestTarget};

/// The device a run targets, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDevice {
    pub name: String,
    /// Phone paired with a watch; installs go through it
    pub companion_name: Option<String>,
}

impl ResolvedDevice {
    /// Where mlaunch should install to: the companion when there is one.
    pub fn install_target(&self) -> &str {
        self.companion_name.as_deref().unwrap_or(&self.name)
    }
}

/// Device and simulators chosen for one run. Each is set at most once.
#[derive(Debug, Clone, Default)]
pub struct ResolvedExecutionContext {
    device: Option<ResolvedDevice>,
    simulators: Option<Vec<SharedSimulator>>,
}

impl ResolvedExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from simulators the caller already picked.
    pub fn with_simulators(simulators: Vec<SharedSimulator>) -> Self {
        Self {
            device: None,
            simulators: Some(simulators),
        }
    }

    /// Start from a device the caller already picked.
    pub fn with_device(device: ResolvedDevice) -> Self {
        Self {
            device: Some(device),
            simulators: None,
        }
    }

    pub fn device(&self) -> Option<&ResolvedDevice> {
        self.device.as_ref()
    }

    pub fn simulators(&self) -> Option<&[SharedSimulator]> {
        self.simulators.as_deref()
    }

    /// Resolve the device once. Later calls return the cached result.
    pub fn resolve_device(
        &mut self,
        loader: &dyn DeviceLoader,
        run_mode: RunMode,
        configured: Option<&str>,
        configured_companion: Option<&str>,
        log: &SharedLog,
    ) -> Result<&ResolvedDevice, RunnerError> {
        if self.device.is_none() {
            let device = find_device(loader, run_mode, configured, configured_companion, log)?;
            self.device = Some(device);
        }
        self.device
            .as_ref()
            .ok_or_else(|| RunnerError::InvalidOperation("device resolution produced nothing".into()))
    }

    /// Resolve simulators once. Later calls return the cached result.
    pub fn resolve_simulators(
        &mut self,
        loader: &dyn SimulatorLoader,
        target: TestTarget,
        log: &SharedLog,
    ) -> Result<&[SharedSimulator], RunnerError> {
        if self.simulators.is_none() {
            let found = loader.find(target, log)?;
            if found.is_empty() {
                return Err(RunnerError::NoSimulatorFound {
                    target: target.to_string(),
                });
            }
            for sim in &found {
                log.write_line(&format!("Using simulator '{}' ({})", sim.name(), sim.udid()));
            }
            self.simulators = Some(found);
        }
        self.simulators
            .as_deref()
            .ok_or_else(|| RunnerError::InvalidOperation("simulator resolution produced nothing".into()))
    }
}

fn find_device(
    loader: &dyn DeviceLoader,
    run_mode: RunMode,
    configured: Option<&str>,
    configured_companion: Option<&str>,
    log: &SharedLog,
) -> Result<ResolvedDevice, RunnerError> {
    if let Some(name) = configured.filter(|n| !n.is_empty()) {
        tracing::debug!(device = %name, "using configured device");
        return Ok(ResolvedDevice {
            name: name.to_string(),
            companion_name: configured_companion.map(str::to_string),
        });
    }

    let classes = run_mode.device_classes();
    let candidates: Vec<HardwareDevice> = loader
        .connected_devices()?
        .into_iter()
        .filter(|d| classes.contains(&d.device_class) && d.is_usable())
        .collect();

    let selected = match select_device(&candidates) {
        Some(device) => device,
        None => {
            return Err(RunnerError::NoDeviceFound {
                classes: classes.to_vec(),
            })
        }
    };

    if candidates.len() > 1 {
        let names: Vec<String> = candidates
            .iter()
            .map(|d| format!("{} ({})", d.name, d.product_version))
            .collect();
        let class_names: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        log.write_line(&format!(
            "Found {} devices for device class(es) '{}': '{}'. Selected: '{}' (because it has the lowest version).",
            candidates.len(),
            class_names.join("', '"),
            names.join("', '"),
            selected.name
        ));
    }

    let companion_name = if run_mode == RunMode::Watchos {
        match loader.find_companion_device(selected)? {
            Some(companion) => Some(companion.name),
            None => {
                return Err(RunnerError::NoCompanionDevice {
                    device: selected.name.clone(),
                })
            }
        }
    } else {
        None
    };

    Ok(ResolvedDevice {
        name: selected.name.clone(),
        companion_name,
    })
}

/// Lowest OS version wins. A device whose version does not parse is only
/// picked when no candidate has a version that does. Ties keep list order.
pub fn select_device(candidates: &[HardwareDevice]) -> Option<&HardwareDevice> {
    candidates.iter().min_by_key(|d| {
        let version = d.os_version();
        (version.is_none(), version)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DiscoveryError;
    use crate::logs::{Log, MemoryLog};
    use crate::target::DeviceClass;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

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

    struct Loader {
        devices: Vec<HardwareDevice>,
        calls: AtomicUsize,
    }

    impl Loader {
        fn new(devices: Vec<HardwareDevice>) -> Self {
            Self {
                devices,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl DeviceLoader for Loader {
        fn connected_devices(&self) -> Result<Vec<HardwareDevice>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.devices.clone())
        }

        fn find_companion_device(
            &self,
            _device: &HardwareDevice,
        ) -> Result<Option<HardwareDevice>, DiscoveryError> {
            Ok(self
                .devices
                .iter()
                .find(|d| d.device_class == DeviceClass::IPhone)
                .cloned())
        }
    }

    fn log() -> SharedLog {
        Arc::new(MemoryLog::new("main"))
    }

    #[test]
    fn test_lowest_version_wins() {
        let candidates = vec![
            device("ten", DeviceClass::IPhone, "10.0"),
            device("nine", DeviceClass::IPhone, "9.0"),
            device("odd", DeviceClass::IPhone, "unparsable"),
        ];
        assert_eq!(select_device(&candidates).unwrap().name, "nine");
    }

    #[test]
    fn test_unparsable_only_as_last_resort() {
        let candidates = vec![device("odd", DeviceClass::IPhone, "beta")];
        assert_eq!(select_device(&candidates).unwrap().name, "odd");
        assert!(select_device(&[]).is_none());
    }

    #[test]
    fn test_ties_keep_order() {
        let candidates = vec![
            device("first", DeviceClass::IPad, "17.0"),
            device("second", DeviceClass::IPhone, "17.0.0"),
        ];
        assert_eq!(select_device(&candidates).unwrap().name, "first");
    }

    #[test]
    fn test_filters_by_class_and_usability() {
        let mut locked = device("locked", DeviceClass::IPhone, "8.0");
        locked.usable_for_debugging = Some(false);
        let loader = Loader::new(vec![
            locked,
            device("tv", DeviceClass::AppleTv, "7.0"),
            device("phone", DeviceClass::IPhone, "16.0"),
        ]);
        let log = log();

        let mut context = ResolvedExecutionContext::new();
        let resolved = context
            .resolve_device(&loader, RunMode::Ios, None, None, &log)
            .unwrap();
        assert_eq!(resolved.name, "phone");
        assert_eq!(resolved.companion_name, None);
    }

    #[test]
    fn test_preset_device_skips_discovery() {
        let loader = Loader::new(vec![device("phone", DeviceClass::IPhone, "16.0")]);
        let mut context = ResolvedExecutionContext::with_device(ResolvedDevice {
            name: "watch".to_string(),
            companion_name: Some("phone".to_string()),
        });
        let resolved = context
            .resolve_device(&loader, RunMode::Watchos, None, None, &log())
            .unwrap();
        assert_eq!(resolved.install_target(), "phone");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_selection_is_logged() {
        let loader = Loader::new(vec![
            device("ten", DeviceClass::IPhone, "10.0"),
            device("nine", DeviceClass::IPhone, "9.0"),
        ]);
        let memory = Arc::new(MemoryLog::new("main"));
        let log: SharedLog = memory.clone();
        ResolvedExecutionContext::new()
            .resolve_device(&loader, RunMode::Ios, None, None, &log)
            .unwrap();
        let text = memory.contents().unwrap();
        assert!(text.contains("Found 2 devices"));
        assert!(text.contains("Selected: 'nine'"));
    }

    #[test]
    fn test_no_device() {
        let loader = Loader::new(vec![device("phone", DeviceClass::IPhone, "16.0")]);
        let err = ResolvedExecutionContext::new()
            .resolve_device(&loader, RunMode::Tvos, None, None, &log())
            .unwrap_err();
        assert!(matches!(err, RunnerError::NoDeviceFound { .. }));
        assert!(err.is_resolution());
    }

    #[test]
    fn test_configured_name_skips_discovery() {
        let loader = Loader::new(vec![]);
        let mut context = ResolvedExecutionContext::new();
        let resolved = context
            .resolve_device(&loader, RunMode::Ios, Some("Lab iPhone"), None, &log())
            .unwrap();
        assert_eq!(resolved.name, "Lab iPhone");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolution_is_cached() {
        let loader = Loader::new(vec![device("phone", DeviceClass::IPhone, "16.0")]);
        let log = log();
        let mut context = ResolvedExecutionContext::new();
        let first = context
            .resolve_device(&loader, RunMode::Ios, None, None, &log)
            .unwrap()
            .clone();
        let second = context
            .resolve_device(&loader, RunMode::Ios, None, None, &log)
            .unwrap()
            .clone();
        assert_eq!(first, second);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watch_gets_companion() {
        let loader = Loader::new(vec![
            device("watch", DeviceClass::Watch, "10.0"),
            device("phone", DeviceClass::IPhone, "17.0"),
        ]);
        let mut context = ResolvedExecutionContext::new();
        let resolved = context
            .resolve_device(&loader, RunMode::Watchos, None, None, &log())
            .unwrap();
        assert_eq!(resolved.name, "watch");
        assert_eq!(resolved.install_target(), "phone");
    }

    #[test]
    fn test_watch_without_companion() {
        let loader = Loader::new(vec![device("watch", DeviceClass::Watch, "10.0")]);
        let err = ResolvedExecutionContext::new()
            .resolve_device(&loader, RunMode::Watchos, None, None, &log())
            .unwrap_err();
        assert!(matches!(err, RunnerError::NoCompanionDevice { .. }));
    }
}
