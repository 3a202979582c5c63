use std::sync::Arc;

use courier_broker::BrokerError;
use courier_cache::CacheError;
use courier_common::ValidationError;
use courier_smtp::{TransportError, client::ClientError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown template {0:?}")]
    Unknown(String),

    #[error("Template {template:?} has no value for field {field:?}")]
    MissingField { template: String, field: String },
}

/// Why one item of a batch failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The delivery body is not a valid email payload.
    #[error("Decode failed: {0}")]
    Decode(#[from] ValidationError),

    #[error("Template failed: {0}")]
    Template(#[from] TemplateError),

    #[error("Attachment failed: {0}")]
    Attachment(#[from] CacheError),

    /// The MIME message could not be assembled.
    #[error("Message failed: {0}")]
    Message(#[from] ClientError),

    /// The SMTP session failed; shared by every item in the session.
    #[error("Transport failed: {0}")]
    Transport(Arc<TransportError>),

    /// Sent, but the broker could not be told.
    #[error("Acknowledge failed: {0}")]
    Acknowledge(BrokerError),
}

impl DispatchError {
    /// `false` only for acknowledge failures, whose email was delivered.
    #[must_use]
    pub const fn requeues(&self) -> bool {
        !matches!(self, Self::Acknowledge(_))
    }

    /// Whether a redelivery may succeed where this attempt failed. Permanent
    /// failures are still requeued; the broker dead-letters them once the
    /// delivery limit is reached.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Attachment(err) => err.is_transient(),
            Self::Transport(err) => err.is_transient(),
            Self::Decode(_) | Self::Template(_) | Self::Message(_) | Self::Acknowledge(_) => false,
        }
    }
}
