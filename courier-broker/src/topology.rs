//! Queue topology: every work queue is paired with a dead-letter exchange and
//! queue that receive messages once the broker's delivery limit is reached.
//!
//! ```text
//! <queue> ──(x-delivery-limit exceeded)──▶ <queue>-dlx exchange ──"dead-message"──▶ <queue>-dlx queue
//! ```

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

/// Routing key used between the dead-letter exchange and its queue.
pub const DEAD_LETTER_ROUTING_KEY: &str = "dead-message";

/// Replicated, durable queue type used for both queues.
pub const QUEUE_TYPE: &str = "quorum";

/// Name shared by the dead-letter exchange and queue for `queue`.
#[must_use]
pub fn dead_letter_name(queue: &str) -> String {
    format!("{queue}-dlx")
}

/// Arguments for the primary work queue.
#[must_use]
pub fn primary_queue_arguments(queue: &str, max_redeliveries: u32) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from(dead_letter_name(queue))),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(DEAD_LETTER_ROUTING_KEY)),
    );
    arguments.insert(
        ShortString::from("x-delivery-limit"),
        AMQPValue::LongLongInt(i64::from(max_redeliveries)),
    );
    arguments.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from(QUEUE_TYPE)),
    );
    arguments
}

/// Arguments for the dead-letter queue.
#[must_use]
pub fn dead_letter_queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from(QUEUE_TYPE)),
    );
    arguments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argument<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table
            .inner()
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    #[test]
    fn test_dead_letter_name() {
        assert_eq!(dead_letter_name("emails"), "emails-dlx");
    }

    #[test]
    fn test_primary_queue_arguments() {
        let arguments = primary_queue_arguments("emails", 5);

        assert_eq!(
            argument(&arguments, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString(LongString::from("emails-dlx")))
        );
        assert_eq!(
            argument(&arguments, "x-dead-letter-routing-key"),
            Some(&AMQPValue::LongString(LongString::from("dead-message")))
        );
        assert_eq!(
            argument(&arguments, "x-delivery-limit"),
            Some(&AMQPValue::LongLongInt(5))
        );
        assert_eq!(
            argument(&arguments, "x-queue-type"),
            Some(&AMQPValue::LongString(LongString::from("quorum")))
        );
    }

    #[test]
    fn test_dead_letter_queue_is_quorum() {
        let arguments = dead_letter_queue_arguments();
        assert_eq!(arguments.inner().len(), 1);
        assert!(argument(&arguments, "x-queue-type").is_some());
    }
}
