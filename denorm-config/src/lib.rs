//! Configuration for the denormalization engine.
//!
//! Configuration is loaded hierarchically: a base file, an environment file selected by
//! `APP_ENVIRONMENT` and finally `APP_`-prefixed environment variables. See [`load_config`].

mod environment;
mod load;
pub mod shared;

pub use environment::{ENVIRONMENT_VAR, Environment, UnknownEnvironment};
pub use load::{Config, LoadConfigError, load_config, load_config_from};
