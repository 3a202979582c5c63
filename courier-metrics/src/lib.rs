//! Dispatch metrics for courier.
//!
//! The dispatcher reports through the [`DispatchRecorder`] sink. With metrics
//! enabled the sink is [`DispatchMetrics`], which pushes OpenTelemetry
//! instruments over OTLP/HTTP; otherwise it is the [`NoopRecorder`].
//!
//! ```text
//! courier → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape) → Grafana
//! ```
//!
//! ```rust,no_run
//! use courier_metrics::{init_metrics, MetricsConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = init_metrics(&MetricsConfig::default())?;
//! recorder.record_received(3, 1024);
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod error;
mod exporter;
mod recorder;

use std::sync::Arc;

use courier_common::internal;
use once_cell::sync::OnceCell;
use opentelemetry_sdk::metrics::SdkMeterProvider;

pub use config::MetricsConfig;
pub use dispatch::{DispatchMetrics, DispatchTotals};
pub use error::MetricsError;
pub use recorder::{DispatchRecorder, NoopRecorder};

/// The installed meter provider, kept so it can be flushed on shutdown.
static METER_PROVIDER: OnceCell<SdkMeterProvider> = OnceCell::new();

/// Install the OTLP meter provider and build the recorder.
///
/// Returns a [`NoopRecorder`] when metrics are disabled.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called more than
/// once with metrics enabled.
pub fn init_metrics(config: &MetricsConfig) -> Result<Arc<dyn DispatchRecorder>, MetricsError> {
    if !config.enabled {
        internal!(level = INFO, "Metrics collection is disabled");
        return Ok(Arc::new(NoopRecorder));
    }

    internal!(
        level = INFO,
        "Initializing OpenTelemetry metrics with OTLP exporter at {}",
        config.endpoint
    );

    let provider = exporter::init_otlp_exporter(&config.endpoint)?;
    METER_PROVIDER
        .set(provider.clone())
        .map_err(|_| MetricsError::AlreadyInitialized)?;
    opentelemetry::global::set_meter_provider(provider);

    Ok(Arc::new(DispatchMetrics::new()))
}

/// Flush and stop the exporter, if one was installed.
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get()
        && let Err(err) = provider.shutdown()
    {
        internal!(level = WARN, "Failed to flush metrics: {err}");
    }
}
