//! Errors raised when an argument list violates mlaunch ordering rules.

use thiserror::Error;

/// Ordering violations detected by [`crate::MlaunchArguments::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentOrderError {
    /// A verbosity flag appeared after another argument.
    #[error("verbosity flag at position {position} follows a non-verbosity argument")]
    VerbosityAfterCommand { position: usize },

    /// An environment variable or app argument was added after the launch verb.
    #[error("{argument} at position {position} follows the launch verb")]
    AfterLaunchVerb { position: usize, argument: String },

    /// More than one launch, install or uninstall verb was supplied.
    #[error("multiple command verbs: {first} and {second}")]
    MultipleVerbs { first: String, second: String },
}
