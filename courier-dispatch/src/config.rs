use std::time::Duration;

use courier_smtp::Mailbox;
use serde::Deserialize;

const fn default_max_batch_size() -> usize {
    100
}

const fn default_flush_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Deliveries per batch; a full batch is flushed at once
    ///
    /// Default: 100
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Idle time after the last delivery before a partial batch is flushed
    /// (in milliseconds)
    ///
    /// Default: 2000 (2 seconds)
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub const fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// The envelope sender and `From` header for every message.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

impl From<&SenderConfig> for Mailbox {
    fn from(sender: &SenderConfig) -> Self {
        Self::new(sender.name.clone(), sender.email.clone())
    }
}
