//! Typed errors for broker operations.
//!
//! Errors are split by whether another attempt can succeed:
//! - Connectivity (dial, channel, closed connection, timeouts, unconfirmed
//!   publishes) is transient and retried under the caller's policy
//! - Protocol and serialisation failures are permanent and surface at once

use std::time::Duration;

use thiserror::Error;

use crate::retry::{RetryError, Retryable};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The connection is down or being re-established.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Dialing the broker or negotiating the connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A channel could not be opened or was closed under us.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The broker refused the request (e.g. mismatched queue arguments).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A declare call did not complete in time.
    #[error("Declaration timed out after {0:?}")]
    DeclareTimeout(Duration),

    /// A publish was not confirmed in time.
    #[error("Publish confirmation timed out after {0:?}")]
    Timeout(Duration),

    /// The broker negatively acknowledged a publish.
    #[error("Publish was not confirmed by the broker")]
    NotConfirmed,

    /// The payload could not be serialised.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Every attempt failed; holds the error from each attempt in order.
    #[error("Gave up after {} attempts: [{}]", .0.len(), join(.0))]
    MaxRetries(Vec<BrokerError>),

    /// The connection was shut down explicitly.
    #[error("Broker connection is shutting down")]
    Shutdown,
}

fn join(errors: &[BrokerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BrokerError {
    /// Returns `true` if the error means the current connection is unusable.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Connection(_) | Self::Channel(_))
    }
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Connection(_)
                | Self::Channel(_)
                | Self::DeclareTimeout(_)
                | Self::Timeout(_)
                | Self::NotConfirmed
        )
    }
}

impl From<RetryError<Self>> for BrokerError {
    fn from(error: RetryError<Self>) -> Self {
        match error {
            RetryError::Permanent(err) => err,
            RetryError::Exhausted(errors) => Self::MaxRetries(errors),
            RetryError::Shutdown(_) => Self::Shutdown,
        }
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(error: lapin::Error) -> Self {
        match error {
            lapin::Error::ProtocolError(err) => Self::Protocol(err.to_string()),
            lapin::Error::InvalidConnectionState(_) => Self::ConnectionClosed,
            lapin::Error::InvalidChannelState(_) => Self::Channel(error.to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
