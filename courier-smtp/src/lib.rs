//! SMTP submission for courier.
//!
//! - [`client`]: a small SMTP client over plain TCP that upgrades with
//!   STARTTLS and authenticates with AUTH PLAIN
//! - [`MessageBuilder`]: RFC 5322 messages with optional `multipart/mixed`
//!   attachments
//! - [`Transport`] / [`Session`]: the seam the dispatcher sends through; one
//!   session carries a whole batch
//!
//! ```no_run
//! use courier_smtp::{Mailbox, MessageBuilder, SmtpConfig, SmtpTransport, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let message = MessageBuilder::new(Mailbox::new("Courier", "noreply@example.com"))
//!     .to(Mailbox::new("Ada", "ada@example.com"))
//!     .subject("Welcome")
//!     .body("Hello Ada")
//!     .build()?;
//!
//! let transport = SmtpTransport::new(SmtpConfig::default());
//! let mut session = transport.open().await?;
//! session.send_all(&[message]).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
mod config;
mod error;
mod message;
mod transport;

pub use config::{SmtpConfig, SmtpTimeouts};
pub use error::TransportError;
pub use message::{Mailbox, MessageBuilder, OutboundMessage, guess_content_type};
pub use transport::{Session, SmtpTransport, Transport};
