//! Turning a stream of broker deliveries into SMTP sends.
//!
//! [`BatchCollector`] groups deliveries into batches, flushing on size or
//! after an idle timeout. [`EmailDispatcher`] takes one batch through four
//! stages (decode, materialize, transmit, acknowledge) and reports a
//! [`DispatchStatus`]. Items that fail a stage drop out of the later ones and
//! are requeued with the broker exactly once.

mod batch;
mod config;
mod dispatcher;
mod error;
mod status;
mod template;

pub use batch::BatchCollector;
pub use config::{BatchConfig, SenderConfig};
pub use dispatcher::EmailDispatcher;
pub use error::{DispatchError, TemplateError};
pub use status::DispatchStatus;
pub use template::{MemoryTemplates, TemplateSource, expand};
