//! Ordered mlaunch argument list.

use serde::{Deserialize, Serialize};

use crate::argument::MlaunchArgument;
use crate::error::ArgumentOrderError;

/// An ordered list of mlaunch arguments, built fresh for every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlaunchArguments {
    args: Vec<MlaunchArgument>,
}

impl MlaunchArguments {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Append one argument.
    pub fn push(&mut self, arg: MlaunchArgument) {
        self.args.push(arg);
    }

    /// Append `count` verbosity flags.
    pub fn push_verbosity(&mut self, count: usize) {
        for _ in 0..count {
            self.args.push(MlaunchArgument::Verbosity);
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MlaunchArgument> {
        self.args.iter()
    }

    pub fn contains(&self, arg: &MlaunchArgument) -> bool {
        self.args.contains(arg)
    }

    /// First command verb in the list, if any.
    pub fn verb(&self) -> Option<&MlaunchArgument> {
        self.args.iter().find(|a| a.is_verb())
    }

    /// Value of the first `--setenv` entry for `name`.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.args.iter().find_map(|a| match a {
            MlaunchArgument::SetEnvVariable { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Check the ordering rules mlaunch depends on.
    ///
    /// - verbosity flags come before everything else
    /// - at most one command verb
    /// - environment variables and app arguments precede the launch verb
    pub fn validate(&self) -> Result<(), ArgumentOrderError> {
        let mut seen_other = false;
        let mut verb: Option<&MlaunchArgument> = None;
        let mut launched = false;

        for (position, arg) in self.args.iter().enumerate() {
            match arg {
                MlaunchArgument::Verbosity => {
                    if seen_other {
                        return Err(ArgumentOrderError::VerbosityAfterCommand { position });
                    }
                    continue;
                }
                _ => seen_other = true,
            }

            if arg.is_verb() {
                if let Some(first) = verb {
                    return Err(ArgumentOrderError::MultipleVerbs {
                        first: first.to_string(),
                        second: arg.to_string(),
                    });
                }
                verb = Some(arg);
                launched = arg.is_launch_verb();
            } else if launched && arg.is_app_setup() {
                return Err(ArgumentOrderError::AfterLaunchVerb {
                    position,
                    argument: arg.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Render to argv tokens in order.
    pub fn to_argv(&self) -> Vec<String> {
        self.args.iter().flat_map(|a| a.to_tokens()).collect()
    }

    /// Render a shell-quoted command line for logs.
    pub fn as_command_line(&self) -> String {
        self.to_argv()
            .iter()
            .map(|t| quote(t))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Extend<MlaunchArgument> for MlaunchArguments {
    fn extend<T: IntoIterator<Item = MlaunchArgument>>(&mut self, iter: T) {
        self.args.extend(iter);
    }
}

impl<'a> IntoIterator for &'a MlaunchArguments {
    type Item = &'a MlaunchArgument;
    type IntoIter = std::slice::Iter<'a, MlaunchArgument>;

    fn into_iter(self) -> Self::IntoIter {
        self.args.iter()
    }
}

fn quote(token: &str) -> String {
    let plain = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=:/.,@+".contains(c));
    if plain && !token.is_empty() {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}
