//! Device discovery through `xcrun devicectl`

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use super::{run_tool, DeviceLoader, DiscoveryError, HardwareDevice};
use crate::target::DeviceClass;

#[derive(Debug, Deserialize)]
struct DevicectlOutput {
    result: DevicectlResult,
}

#[derive(Debug, Deserialize)]
struct DevicectlResult {
    #[serde(default)]
    devices: Vec<ListedDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedDevice {
    identifier: String,
    #[serde(default)]
    device_properties: DeviceProperties,
    #[serde(default)]
    hardware_properties: HardwareProperties,
    #[serde(default)]
    connection_properties: ConnectionProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceProperties {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    os_version_number: Option<String>,
    #[serde(default)]
    developer_mode_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardwareProperties {
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    udid: Option<String>,
    #[serde(default)]
    companion_udid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionProperties {
    #[serde(default)]
    pairing_state: Option<String>,
    #[serde(default)]
    tunnel_state: Option<String>,
}

impl ListedDevice {
    fn is_connected(&self) -> bool {
        let paired = self.connection_properties.pairing_state.as_deref() == Some("paired");
        let tunnel = self.connection_properties.tunnel_state.as_deref();
        paired && tunnel != Some("unavailable")
    }

    fn into_hardware(self) -> HardwareDevice {
        let udid = self
            .hardware_properties
            .udid
            .unwrap_or_else(|| self.identifier.clone());
        let usable_for_debugging = self
            .device_properties
            .developer_mode_status
            .as_deref()
            .map(|s| s == "enabled");

        HardwareDevice {
            name: self.device_properties.name.unwrap_or_else(|| udid.clone()),
            device_class: self
                .hardware_properties
                .device_type
                .as_deref()
                .map(DeviceClass::from_device_type)
                .unwrap_or(DeviceClass::Unknown),
            product_version: self.device_properties.os_version_number.unwrap_or_default(),
            usable_for_debugging,
            companion_udid: self.hardware_properties.companion_udid,
            udid,
        }
    }
}

/// Connected devices that are paired and reachable.
pub(crate) fn parse_devices(json: &[u8]) -> Result<Vec<HardwareDevice>, DiscoveryError> {
    let output: DevicectlOutput =
        serde_json::from_slice(json).map_err(|e| DiscoveryError::Parse {
            source_name: "devicectl list devices".to_string(),
            message: e.to_string(),
        })?;
    Ok(output
        .result
        .devices
        .into_iter()
        .filter(ListedDevice::is_connected)
        .map(ListedDevice::into_hardware)
        .collect())
}

/// A watch's companion: the phone it names, else the first connected phone.
pub(crate) fn companion_for(
    device: &HardwareDevice,
    devices: &[HardwareDevice],
) -> Option<HardwareDevice> {
    let phones = devices.iter().filter(|d| d.device_class == DeviceClass::IPhone);
    match device.companion_udid {
        Some(ref udid) => phones.clone().find(|d| &d.udid == udid),
        None => phones.clone().next(),
    }
    .cloned()
}

/// Loads devices from `xcrun devicectl list devices`.
#[derive(Debug, Clone, Default)]
pub struct DevicectlDeviceLoader {
    scratch_dir: Option<PathBuf>,
}

impl DevicectlDeviceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the JSON report under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: Some(dir.into()),
        }
    }

    fn load(&self) -> Result<Vec<HardwareDevice>, DiscoveryError> {
        let dir = self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
        let report = dir.join(format!("devicectl-{}.json", uuid::Uuid::new_v4()));
        let report_arg = report.display().to_string();

        run_tool(
            "xcrun",
            &["devicectl", "list", "devices", "--json-output", &report_arg],
        )?;
        let json = fs::read(&report).map_err(|e| DiscoveryError::Command {
            command: "devicectl list devices".to_string(),
            message: format!("could not read {}: {}", report.display(), e),
        })?;
        let _ = fs::remove_file(&report);
        parse_devices(&json)
    }
}

impl DeviceLoader for DevicectlDeviceLoader {
    fn connected_devices(&self) -> Result<Vec<HardwareDevice>, DiscoveryError> {
        let devices = self.load()?;
        tracing::debug!(count = devices.len(), "loaded connected devices");
        Ok(devices)
    }

    fn find_companion_device(
        &self,
        device: &HardwareDevice,
    ) -> Result<Option<HardwareDevice>, DiscoveryError> {
        let devices = self.load()?;
        Ok(companion_for(device, &devices))
    }
}
