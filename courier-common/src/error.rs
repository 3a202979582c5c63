//! Error types for the courier-common crate.

use thiserror::Error;

/// Reasons an [`Email`](crate::Email) payload is rejected at the message boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The body was not valid JSON for the email schema.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Neither `receivers` nor `blindReceivers` contained an entry.
    #[error("At least one receiver or blind receiver is required")]
    NoRecipients,

    /// A recipient is missing its display name.
    #[error("Recipient {0} is missing a name")]
    MissingName(String),

    /// A recipient name contains CR, LF or another control character.
    #[error("Recipient {0} has control characters in its name")]
    UnsafeName(String),

    /// A recipient address could not be parsed as a single mailbox.
    #[error("Invalid email address: {0:?}")]
    InvalidAddress(String),

    /// The subject was empty.
    #[error("Subject is required")]
    MissingSubject,

    /// Both or neither of `message` and `template` were provided.
    #[error("Exactly one of message or template is required")]
    BodyConflict,

    /// The template reference had an empty name.
    #[error("Template name is required")]
    MissingTemplateName,

    /// An attachment identifier was empty.
    #[error("Attachment identifiers must not be empty")]
    EmptyAttachment,

    /// An attachment identifier contains a control character.
    #[error("Attachment identifier {0:?} has control characters")]
    UnsafeAttachment(String),
}
