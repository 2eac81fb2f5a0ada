//! Orchestrator-level errors.
//!
//! Only faults that abort a run before launch surface as `RunnerError`.
//! Everything that goes wrong after launch is folded into the run verdict.

use std::io;

use thiserror::Error;

use crate::bundle::Extension;
use crate::hardware::DiscoveryError;
use crate::listener::ListenerError;
use crate::process::ProcessError;
use crate::state::PhaseError;
use crate::target::DeviceClass;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// No connected device matched the run mode's device classes.
    #[error("could not find any applicable devices with device class(es): {}", join_classes(.classes))]
    NoDeviceFound { classes: Vec<DeviceClass> },

    /// The simulator catalog had nothing matching the target.
    #[error("could not find a simulator for target {target}")]
    NoSimulatorFound { target: String },

    /// A watch device was selected but no companion could be paired.
    #[error("could not find a companion device for '{device}'")]
    NoCompanionDevice { device: String },

    /// The operation makes no sense for this target.
    #[error("{0}")]
    InvalidOperation(String),

    /// The bundle's extension kind has no launch descriptor.
    #[error("launching {0} extensions is not implemented")]
    UnsupportedExtension(Extension),

    #[error("device discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Phase(#[from] PhaseError),
}

impl RunnerError {
    /// Faults detected while resolving the target.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            RunnerError::NoDeviceFound { .. }
                | RunnerError::NoSimulatorFound { .. }
                | RunnerError::NoCompanionDevice { .. }
                | RunnerError::Discovery(_)
        )
    }
}

fn join_classes(classes: &[DeviceClass]) -> String {
    classes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
