use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Environment variable that turns on log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static TEST_TRACING: Once = Once::new();

/// Errors returned when the global subscriber cannot be installed.
pub type TracingInitError = tracing_subscriber::util::TryInitError;

/// Installs the global subscriber: a fmt layer filtered by `RUST_LOG` (default `info`).
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing() -> Result<(), TracingInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
}

/// Installs a test subscriber if `ENABLE_TRACING` is set.
///
/// Safe to call from every test; only the first call has an effect. Output goes through the
/// test writer so it is captured per test.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
