//! Broker connection configuration.

use std::time::Duration;

use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use serde::Deserialize;

use crate::RetryPolicy;

const fn default_port() -> u16 {
    5672
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_credential() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_prefetch() -> u16 {
    100
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_publish_attempts() -> u32 {
    5
}

const fn default_declare_attempts() -> u32 {
    3
}

const fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_credential")]
    pub username: String,

    #[serde(default = "default_credential")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Connect with `amqps` instead of `amqp`
    #[serde(default)]
    pub tls: bool,

    /// Deliveries allowed per message before the broker dead-letters it.
    ///
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Unacknowledged deliveries the broker may push to one consumer.
    ///
    /// Must be at least the batch size or a batch can never fill.
    ///
    /// Default: 100
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,

    /// How long to wait for a publish confirmation (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub publish_timeout_secs: u64,

    /// How long to wait for each declare call (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub declare_timeout_secs: u64,

    /// Attempts per publish before giving up
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,

    /// Attempts per queue declaration before giving up
    #[serde(default = "default_declare_attempts")]
    pub declare_attempts: u32,

    /// First reconnect/retry delay; doubles after every failure (in milliseconds)
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_credential(),
            password: default_credential(),
            vhost: default_vhost(),
            tls: false,
            max_retries: default_max_retries(),
            prefetch: default_prefetch(),
            publish_timeout_secs: default_timeout_secs(),
            declare_timeout_secs: default_timeout_secs(),
            publish_attempts: default_publish_attempts(),
            declare_attempts: default_declare_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

impl BrokerConfig {
    /// The connection URI assembled from the individual components.
    #[must_use]
    pub fn uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: if self.tls {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }

    const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Policy for the supervisor's dial loop: unbounded.
    #[must_use]
    pub const fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.base_delay())
    }

    #[must_use]
    pub const fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.publish_attempts, self.base_delay())
    }

    #[must_use]
    pub const fn declare_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.declare_attempts, self.base_delay())
    }

    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    #[must_use]
    pub const fn declare_timeout(&self) -> Duration {
        Duration::from_secs(self.declare_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.port, 5672);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.publish_policy().max_attempts, Some(5));
        assert_eq!(config.declare_policy().max_attempts, Some(3));
        assert_eq!(config.reconnect_policy().max_attempts, None);
        assert_eq!(config.reconnect_policy().base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_uri_components() {
        let config = BrokerConfig {
            host: "rabbit.internal".to_string(),
            port: 5671,
            username: "courier".to_string(),
            password: "p@ss/word".to_string(),
            vhost: "mail".to_string(),
            tls: true,
            ..Default::default()
        };

        let uri = config.uri();
        assert_eq!(uri.scheme, AMQPScheme::AMQPS);
        assert_eq!(uri.authority.host, "rabbit.internal");
        assert_eq!(uri.authority.port, 5671);
        assert_eq!(uri.authority.userinfo.password, "p@ss/word");
        assert_eq!(uri.vhost, "mail");
    }
}
