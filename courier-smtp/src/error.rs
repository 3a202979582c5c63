use thiserror::Error;

use crate::client::ClientError;

/// Session-level failures. Any of these fails the whole batch in flight.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server could not be reached or refused the greeting.
    #[error("Failed to connect to {server}: {reason}")]
    Connect { server: String, reason: String },

    /// The server does not offer STARTTLS, or the upgrade failed.
    #[error("TLS required but unavailable: {0}")]
    TlsRequired(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server answered a command with an error code.
    #[error("Server rejected {command}: {code} {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, std::time::Duration),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl TransportError {
    /// Returns `true` if retrying the same batch later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout(..) | Self::Client(_) => true,
            Self::Rejected { code, .. } => *code >= 400 && *code < 500,
            Self::TlsRequired(_) | Self::AuthenticationFailed(_) => false,
        }
    }
}
