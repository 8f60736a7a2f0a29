use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Environment variable selecting the configuration overlay.
pub const ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

/// Runtime environment of a merge run.
///
/// Selects which overlay file is read on top of the base configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

/// The value of [`ENVIRONMENT_VAR`] names no known environment.
#[derive(Debug, Error)]
#[error("unsupported environment `{0}`, expected `dev` or `prod`")]
pub struct UnknownEnvironment(String);

impl Environment {
    /// Reads the environment from [`ENVIRONMENT_VAR`], defaulting to [`Environment::Dev`].
    pub fn from_env() -> Result<Self, UnknownEnvironment> {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Name of the environment, also the stem of its overlay file.
    pub fn name(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        [Environment::Dev, Environment::Prod]
            .into_iter()
            .find(|environment| environment.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| UnknownEnvironment(name.to_string()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
