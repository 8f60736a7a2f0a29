use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Port the standalone exporter listens on.
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// Interval between recorder upkeep runs.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is global and can be installed only once, but tests install it repeatedly, so
// the handle is cached. A `Mutex` is used because initialization is fallible.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder without an HTTP listener and returns a rendering handle.
///
/// Repeated calls return the cached handle. Must be called inside a Tokio runtime since it
/// spawns the upkeep task.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut cached = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*cached {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *cached = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the Prometheus recorder together with an HTTP listener on `[::]:port/metrics`.
///
/// `run_label`, when given, is attached to every metric as the `run` label.
pub fn init_metrics(port: u16, run_label: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));

    if let Some(run_label) = run_label {
        builder = builder.add_global_label("run", run_label);
    }

    builder.install()?;

    Ok(())
}
