//! Broker plumbing for courier.
//!
//! [`BrokerConnection`] owns one AMQP connection and keeps it alive: a
//! supervisor task ([`BrokerConnection::run`]) redials with exponential
//! backoff whenever the broker closes the connection or its control channel.
//! On top of that it exposes:
//!
//! - confirmed publishes, serialised over the control channel and retried
//!   under a bounded [`RetryPolicy`]
//! - consumers on their own channel with a prefetch limit, surfaced as a lazy
//!   [`Deliveries`] stream
//! - queue provisioning with a dead-letter exchange/queue pair
//!
//! Retry decisions live in [`retry`] so they can be tested without a broker.

mod config;
mod connection;
mod delivery;
mod error;
pub mod retry;
mod state;
pub mod topology;

pub use config::BrokerConfig;
pub use connection::BrokerConnection;
pub use delivery::{Acknowledge, DELIVERY_COUNT_HEADER, Deliveries, Delivery};
pub use error::BrokerError;
pub use retry::{RetryError, RetryPolicy, Retryable};
pub use state::ConnectionState;
