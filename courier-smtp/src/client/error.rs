use std::io;

use thiserror::Error;

/// Errors raised by the SMTP client itself, as opposed to server replies.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not an SMTP response.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    /// A message could not be assembled.
    #[error("Invalid message: {0}")]
    BuilderError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
