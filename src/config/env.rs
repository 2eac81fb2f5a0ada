//! Environment overrides
//!
//! Read once when configuration is built and never consulted afterwards.

use serde_json::{json, Value};

/// Forces the target device name, bypassing discovery.
pub const DEVICE_NAME_VAR: &str = "DEVICE_NAME";

/// Any non-empty value skips simulator clean-state preparation.
pub const SKIP_SIMULATOR_SETUP_VAR: &str = "SKIP_SIMULATOR_SETUP";

/// Snapshot of the environment variables that influence a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub device_name: Option<String>,
    pub skip_simulator_setup: bool,
}

impl EnvOverrides {
    /// Capture the current process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit variable list.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::default();
        for (key, value) in vars {
            let value: String = value.into();
            match key.as_ref() {
                DEVICE_NAME_VAR if !value.is_empty() => overrides.device_name = Some(value),
                SKIP_SIMULATOR_SETUP_VAR if !value.is_empty() => {
                    overrides.skip_simulator_setup = true
                }
                _ => {}
            }
        }
        overrides
    }

    /// Layer value; unset variables contribute nothing.
    pub fn to_value(&self) -> Value {
        let mut value = json!({});
        if let Some(ref name) = self.device_name {
            value["device"] = json!({ "name": name });
        }
        if self.skip_simulator_setup {
            value["simulator"] = json!({ "skip_setup": true });
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_ignored() {
        let env = EnvOverrides::from_vars(vec![("DEVICE_NAME", ""), ("SKIP_SIMULATOR_SETUP", "")]);
        assert_eq!(env, EnvOverrides::default());
        assert_eq!(env.to_value(), json!({}));
    }

    #[test]
    fn test_overrides_captured() {
        let env = EnvOverrides::from_vars(vec![
            ("DEVICE_NAME", "Lab iPhone"),
            ("SKIP_SIMULATOR_SETUP", "1"),
            ("PATH", "/usr/bin"),
        ]);
        assert_eq!(env.device_name.as_deref(), Some("Lab iPhone"));
        assert!(env.skip_simulator_setup);
        let value = env.to_value();
        assert_eq!(value["device"]["name"], "Lab iPhone");
        assert_eq!(value["simulator"]["skip_setup"], true);
    }
}
