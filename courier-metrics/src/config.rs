use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// When disabled every recording is a no-op.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP/HTTP endpoint metrics are pushed to
    ///
    /// Common values:
    /// - `http://localhost:4318/v1/metrics` (local collector)
    /// - `http://otel-collector:4318/v1/metrics` (Docker Compose service name)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

const fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
        }
    }
}
