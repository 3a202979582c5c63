use std::time::Duration;

use serde::Deserialize;

const fn default_port() -> u16 {
    587
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_require_tls() -> bool {
    true
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// SMTP submission server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 587 (submission)
    #[serde(default = "default_port")]
    pub port: u16,

    /// AUTH PLAIN is skipped when unset
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Name announced in EHLO. Defaults to `host`.
    #[serde(default)]
    pub hello_name: Option<String>,

    /// Refuse to send unless the session is upgraded with STARTTLS
    ///
    /// Default: true
    #[serde(default = "default_require_tls")]
    pub require_tls: bool,

    /// Accept any server certificate. Testing only.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            hello_name: None,
            require_tls: default_require_tls(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl SmtpConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn hello_name(&self) -> &str {
        self.hello_name.as_deref().unwrap_or(&self.host)
    }
}

/// Per-command timeouts (in seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpTimeouts {
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub connect_secs: u64,

    /// Covers EHLO, STARTTLS with the TLS handshake, and AUTH
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub handshake_secs: u64,

    /// Covers MAIL FROM and each RCPT TO
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub envelope_secs: u64,

    /// DATA and message transmission
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_command_timeout(),
            handshake_secs: default_command_timeout(),
            envelope_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    #[must_use]
    pub const fn envelope(&self) -> Duration {
        Duration::from_secs(self.envelope_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}
