use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::{Environment, UnknownEnvironment};

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file.
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Stem of the file every environment starts from.
const BASE_STEM: &str = "base";

/// Prefix of environment variables overriding file values, e.g. `APP_BATCH__SIZE`.
const ENV_PREFIX: &str = "APP";

/// Separator between nested keys in environment variable names.
const ENV_KEY_SEPARATOR: &str = "__";

/// Configuration types that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are comma separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// No file with a supported extension exists for a layer.
    #[error("no `{stem}` configuration in `{directory}`, tried extensions {extensions:?}")]
    ConfigurationFileMissing {
        stem: &'static str,
        directory: PathBuf,
        extensions: [&'static str; 3],
    },

    /// A layer exists but could not be read or parsed.
    #[error("failed to read configuration file `{path}`: {source}")]
    ConfigurationFileLoad {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error(transparent)]
    Environment(#[from] UnknownEnvironment),

    /// The merged layers do not match the configuration type.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

impl LoadConfigError {
    /// Whether loading failed only because there is no configuration directory.
    ///
    /// Callers able to run on defaults use this to tell "nothing configured" apart from a
    /// broken configuration.
    pub fn is_missing_directory(&self) -> bool {
        matches!(self, LoadConfigError::MissingConfigurationDirectory(_))
    }
}

/// Loads configuration from `./configuration`. See [`load_config_from`].
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from(&current_dir.join(CONFIGURATION_DIR))
}

/// Loads configuration from `directory` in three layers, later layers winning:
///
/// 1. `base.(yaml|yml|json)`,
/// 2. `{environment}.(yaml|yml|json)` for the environment named by `APP_ENVIRONMENT`,
/// 3. `APP_`-prefixed environment variables, with `__` between nested keys
///    (`APP_STORE__CONNECTION__PASSWORD`) and commas between list items.
pub fn load_config_from<T>(directory: &Path) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let environment = Environment::from_env()?;

    let mut builder = config::Config::builder();
    for stem in [BASE_STEM, environment.name()] {
        let path = locate(directory, stem)?;
        builder = builder.add_source(config::File::from(path.as_path()));

        // Building after each file attributes parse errors to the file that caused them.
        builder
            .build_cloned()
            .map_err(|source| LoadConfigError::ConfigurationFileLoad { path, source })?;
    }

    builder
        .add_source(environment_overrides::<T>())
        .build()
        .and_then(|settings| settings.try_deserialize::<T>())
        .map_err(LoadConfigError::Deserialization)
}

/// Finds the file of one layer.
fn locate(directory: &Path, stem: &'static str) -> Result<PathBuf, LoadConfigError> {
    EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::ConfigurationFileMissing {
            stem,
            directory: directory.to_path_buf(),
            extensions: EXTENSIONS,
        })
}

fn environment_overrides<T: Config>() -> config::Environment {
    let source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_KEY_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(","),
        |source, key| source.with_list_parse_key(key),
    )
}
