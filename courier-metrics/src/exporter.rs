use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

use crate::MetricsError;

/// Build a meter provider that periodically pushes to `endpoint` over
/// OTLP/HTTP.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built.
pub fn init_otlp_exporter(endpoint: &str) -> Result<SdkMeterProvider, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?;

    Ok(SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter).build())
        .build())
}
