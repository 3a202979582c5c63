//! The courier consumer: wires the broker, attachment cache, SMTP transport
//! and metrics together from one RON configuration file.

pub mod config;
pub mod controller;

pub use config::{ConfigError, CourierConfig};
pub use controller::{Courier, SHUTDOWN_BROADCAST};
