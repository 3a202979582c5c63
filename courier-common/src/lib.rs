//! Types shared by every courier crate: the shutdown [`Signal`], logging setup
//! and the [`Email`] payload carried over the broker.

pub mod email;
pub mod error;
pub mod logging;

pub use email::{Email, Recipient, TemplateRef};
pub use error::ValidationError;
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
