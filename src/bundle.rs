//! App bundle descriptor.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Kind of app extension a bundle hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extension {
    TodayExtension,
    WatchKit2,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extension::TodayExtension => f.write_str("TodayExtension"),
            Extension::WatchKit2 => f.write_str("WatchKit2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown extension kind: {0} (expected today or watchkit2)")]
pub struct UnknownExtension(pub String);

impl FromStr for Extension {
    type Err = UnknownExtension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" | "todayextension" => Ok(Extension::TodayExtension),
            "watchkit2" => Ok(Extension::WatchKit2),
            _ => Err(UnknownExtension(s.to_string())),
        }
    }
}

/// Immutable description of the app under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppBundleInformation {
    /// Display name (bundle directory name without `.app`)
    pub app_name: String,
    pub bundle_identifier: String,
    /// On-disk bundle path
    pub app_path: PathBuf,
    /// Path handed to the launch verb
    pub launch_app_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Extension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

impl AppBundleInformation {
    /// Describe the bundle at `app_path`.
    ///
    /// Without an Info.plist reader the bundle identifier defaults to the
    /// bundle's file name; callers that know better override it.
    pub fn from_path(app_path: impl AsRef<Path>, variation: Option<String>) -> Self {
        let app_path = app_path.as_ref().to_path_buf();
        let file_name = app_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let app_name = file_name
            .strip_suffix(".app")
            .unwrap_or(&file_name)
            .to_string();

        Self {
            app_name,
            bundle_identifier: file_name,
            launch_app_path: app_path.clone(),
            app_path,
            extension: None,
            variation,
        }
    }

    pub fn with_bundle_identifier(mut self, bundle_identifier: impl Into<String>) -> Self {
        self.bundle_identifier = bundle_identifier.into();
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_launch_app_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.launch_app_path = path.into();
        self
    }

    pub fn is_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Total size of all files inside the bundle, in bytes.
    pub fn total_size(&self) -> u64 {
        WalkDir::new(&self.app_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}
