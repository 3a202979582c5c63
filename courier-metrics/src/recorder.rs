use std::time::Duration;

/// Per-batch dispatch figures. Counts are message counts unless noted.
pub trait DispatchRecorder: Send + Sync {
    /// Deliveries pulled off the broker and their total body size.
    fn record_received(&self, count: u64, bytes: u64);

    /// Messages accepted by the SMTP server and their total size.
    fn record_sent(&self, count: u64, bytes: u64);

    /// Attachments resolved and their total size.
    fn record_attachments(&self, count: u64, bytes: u64);

    fn record_sent_with_attachment(&self, count: u64);

    /// Deliveries the broker had delivered before.
    fn record_resent(&self, count: u64);

    /// Deliveries at or past the redelivery ceiling.
    fn record_max_retries_reached(&self, count: u64);

    fn record_failed(&self, count: u64);

    fn record_processing_time(&self, elapsed: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl DispatchRecorder for NoopRecorder {
    fn record_received(&self, _count: u64, _bytes: u64) {}

    fn record_sent(&self, _count: u64, _bytes: u64) {}

    fn record_attachments(&self, _count: u64, _bytes: u64) {}

    fn record_sent_with_attachment(&self, _count: u64) {}

    fn record_resent(&self, _count: u64) {}

    fn record_max_retries_reached(&self, _count: u64) {}

    fn record_failed(&self, _count: u64) {}

    fn record_processing_time(&self, _elapsed: Duration) {}
}
