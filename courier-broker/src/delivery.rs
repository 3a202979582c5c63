//! Deliveries pulled from a consumer.
//!
//! A [`Delivery`] owns the message body and a handle used to settle it with the
//! broker. Settlement goes through the [`Acknowledge`] trait so that the
//! dispatch pipeline can be exercised without a live broker.

use std::fmt;

use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use lapin::{
    Channel, Consumer,
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions},
    types::{AMQPValue, FieldTable},
};

use crate::BrokerError;

/// Header the broker increments each time a message is redelivered.
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

/// A lazy, unbounded, non-restartable sequence of deliveries.
///
/// Ends when the consumer's channel or connection closes.
pub type Deliveries = BoxStream<'static, Delivery>;

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Positively acknowledge; the broker forgets the message.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Reject and ask the broker to requeue the message.
    async fn nack_requeue(&self) -> Result<(), BrokerError>;
}

pub struct Delivery {
    body: Vec<u8>,
    delivery_count: u32,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, delivery_count: u32, acker: impl Acknowledge + 'static) -> Self {
        Self {
            body,
            delivery_count,
            acker: Box::new(acker),
        }
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Size of the body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// How many times the broker has delivered this message before.
    #[must_use]
    pub const fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// # Errors
    ///
    /// Returns an error if the broker could not be told.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// # Errors
    ///
    /// Returns an error if the broker could not be told.
    pub async fn nack_requeue(&self) -> Result<(), BrokerError> {
        self.acker.nack_requeue().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledge for LapinAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        Ok(self.0.ack(BasicAckOptions::default()).await?)
    }

    async fn nack_requeue(&self) -> Result<(), BrokerError> {
        Ok(self
            .0
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await?)
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let delivery_count = delivery
            .properties
            .headers()
            .as_ref()
            .and_then(delivery_count);

        Self::new(
            delivery.data,
            delivery_count.unwrap_or_default(),
            LapinAcker(delivery.acker),
        )
    }
}

/// Read [`DELIVERY_COUNT_HEADER`] from a header table, whatever integer
/// width the broker chose for it.
pub(crate) fn delivery_count(headers: &FieldTable) -> Option<u32> {
    let value = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)
        .map(|(_, value)| value)?;

    match *value {
        AMQPValue::ShortShortUInt(v) => Some(u32::from(v)),
        AMQPValue::ShortUInt(v) => Some(u32::from(v)),
        AMQPValue::LongUInt(v) => Some(v),
        AMQPValue::ShortShortInt(v) => u32::try_from(v).ok(),
        AMQPValue::ShortInt(v) => u32::try_from(v).ok(),
        AMQPValue::LongInt(v) => u32::try_from(v).ok(),
        AMQPValue::LongLongInt(v) => u32::try_from(v).ok(),
        _ => None,
    }
}

/// Adapt a lapin consumer into [`Deliveries`].
///
/// The channel travels with the stream so it stays open for as long as the
/// stream is polled. The first consumer error ends the stream.
pub(crate) fn deliveries(consumer: Consumer, channel: Channel) -> Deliveries {
    futures_util::stream::unfold((consumer, channel), |(mut consumer, channel)| async move {
        match consumer.next().await {
            Some(Ok(delivery)) => Some((Delivery::from(delivery), (consumer, channel))),
            Some(Err(err)) => {
                courier_common::incoming!(level = WARN, "Consumer stopped: {err}");
                None
            }
            None => None,
        }
    })
    .boxed()
}
