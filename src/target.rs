//! Test targets, run modes and device classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform and form factor, crossed with simulator-vs-device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestTarget {
    IosSimulator,
    #[serde(rename = "ios-simulator-32")]
    IosSimulator32,
    #[serde(rename = "ios-simulator-64")]
    IosSimulator64,
    TvosSimulator,
    WatchosSimulator,
    IosDevice,
    TvosDevice,
    WatchosDevice,
}

impl TestTarget {
    pub const ALL: [TestTarget; 8] = [
        TestTarget::IosSimulator,
        TestTarget::IosSimulator32,
        TestTarget::IosSimulator64,
        TestTarget::TvosSimulator,
        TestTarget::WatchosSimulator,
        TestTarget::IosDevice,
        TestTarget::TvosDevice,
        TestTarget::WatchosDevice,
    ];

    pub fn is_simulator(&self) -> bool {
        matches!(
            self,
            TestTarget::IosSimulator
                | TestTarget::IosSimulator32
                | TestTarget::IosSimulator64
                | TestTarget::TvosSimulator
                | TestTarget::WatchosSimulator
        )
    }

    pub fn run_mode(&self) -> RunMode {
        match self {
            TestTarget::IosSimulator
            | TestTarget::IosSimulator32
            | TestTarget::IosSimulator64
            | TestTarget::IosDevice => RunMode::Ios,
            TestTarget::TvosSimulator | TestTarget::TvosDevice => RunMode::Tvos,
            TestTarget::WatchosSimulator | TestTarget::WatchosDevice => RunMode::Watchos,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestTarget::IosSimulator => "ios-simulator",
            TestTarget::IosSimulator32 => "ios-simulator-32",
            TestTarget::IosSimulator64 => "ios-simulator-64",
            TestTarget::TvosSimulator => "tvos-simulator",
            TestTarget::WatchosSimulator => "watchos-simulator",
            TestTarget::IosDevice => "ios-device",
            TestTarget::TvosDevice => "tvos-device",
            TestTarget::WatchosDevice => "watchos-device",
        }
    }
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown test target '{0}' (expected one of: ios-simulator, ios-simulator-32, ios-simulator-64, tvos-simulator, watchos-simulator, ios-device, tvos-device, watchos-device)")]
pub struct UnknownTarget(pub String);

impl FromStr for TestTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        TestTarget::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

/// Coarse platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Ios,
    Watchos,
    Tvos,
}

impl RunMode {
    /// Device classes eligible to run this mode.
    pub fn device_classes(&self) -> &'static [DeviceClass] {
        match self {
            RunMode::Ios => &[DeviceClass::IPhone, DeviceClass::IPad, DeviceClass::IPod],
            RunMode::Watchos => &[DeviceClass::Watch],
            RunMode::Tvos => &[DeviceClass::AppleTv],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Ios => "ios",
            RunMode::Watchos => "watchos",
            RunMode::Tvos => "tvos",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware class of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    #[serde(rename = "iPhone")]
    IPhone,
    #[serde(rename = "iPad")]
    IPad,
    #[serde(rename = "iPod")]
    IPod,
    Watch,
    #[serde(rename = "AppleTV")]
    AppleTv,
    Unknown,
}

impl DeviceClass {
    /// Map a device type string as reported by discovery tools.
    pub fn from_device_type(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "iphone" => DeviceClass::IPhone,
            "ipad" => DeviceClass::IPad,
            "ipod" | "ipod touch" => DeviceClass::IPod,
            "watch" | "applewatch" | "apple watch" => DeviceClass::Watch,
            "appletv" | "apple tv" => DeviceClass::AppleTv,
            _ => DeviceClass::Unknown,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceClass::IPhone => "iPhone",
            DeviceClass::IPad => "iPad",
            DeviceClass::IPod => "iPod",
            DeviceClass::Watch => "Watch",
            DeviceClass::AppleTv => "AppleTV",
            DeviceClass::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}
