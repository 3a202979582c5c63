//! Dispatch metrics
//!
//! Tracks what each batch did:
//! - Deliveries received, and messages sent or failed
//! - Attachment counts and sizes
//! - Redeliveries, and deliveries that reached the redelivery ceiling
//! - Batch processing durations

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::DispatchRecorder;

/// Totals recorded since start-up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTotals {
    pub received: u64,
    pub received_bytes: u64,
    pub sent: u64,
    pub sent_bytes: u64,
    pub attachments: u64,
    pub attachment_bytes: u64,
    pub sent_with_attachment: u64,
    pub resent: u64,
    pub max_retries_reached: u64,
    pub failed: u64,
    pub batches: u64,
}

#[derive(Debug, Default)]
struct Totals {
    received: AtomicU64,
    received_bytes: AtomicU64,
    sent: AtomicU64,
    sent_bytes: AtomicU64,
    attachments: AtomicU64,
    attachment_bytes: AtomicU64,
    sent_with_attachment: AtomicU64,
    resent: AtomicU64,
    max_retries_reached: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
}

#[derive(Debug)]
pub struct DispatchMetrics {
    received: Counter<u64>,
    received_bytes: Counter<u64>,
    sent: Counter<u64>,
    sent_bytes: Counter<u64>,
    attachments: Counter<u64>,
    attachment_size_bytes: Histogram<u64>,
    sent_with_attachment: Counter<u64>,
    resent: Counter<u64>,
    max_retries_reached: Counter<u64>,
    failed: Counter<u64>,
    processing_duration: Histogram<f64>,

    totals: Totals,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    /// Instruments on the global meter provider.
    #[must_use]
    pub fn new() -> Self {
        Self::with_meter(&opentelemetry::global::meter("courier.dispatch"))
    }

    #[must_use]
    pub fn with_meter(meter: &Meter) -> Self {
        Self {
            received: meter
                .u64_counter("courier.dispatch.received.total")
                .with_description("Deliveries pulled off the broker")
                .build(),
            received_bytes: meter
                .u64_counter("courier.dispatch.received.bytes")
                .with_description("Bytes of delivery bodies pulled off the broker")
                .build(),
            sent: meter
                .u64_counter("courier.dispatch.sent.total")
                .with_description("Messages accepted by the SMTP server")
                .build(),
            sent_bytes: meter
                .u64_counter("courier.dispatch.sent.bytes")
                .with_description("Bytes of messages accepted by the SMTP server")
                .build(),
            attachments: meter
                .u64_counter("courier.dispatch.attachments.total")
                .with_description("Attachments resolved for sending")
                .build(),
            attachment_size_bytes: meter
                .u64_histogram("courier.dispatch.attachments.size.bytes")
                .with_description("Total attachment bytes per batch")
                .build(),
            sent_with_attachment: meter
                .u64_counter("courier.dispatch.sent_with_attachment.total")
                .with_description("Sent messages that carried at least one attachment")
                .build(),
            resent: meter
                .u64_counter("courier.dispatch.resent.total")
                .with_description("Deliveries that had been delivered before")
                .build(),
            max_retries_reached: meter
                .u64_counter("courier.dispatch.max_retries_reached.total")
                .with_description("Deliveries at or past the redelivery ceiling")
                .build(),
            failed: meter
                .u64_counter("courier.dispatch.failed.total")
                .with_description("Deliveries that failed and were requeued")
                .build(),
            processing_duration: meter
                .f64_histogram("courier.dispatch.processing.duration.seconds")
                .with_description("Distribution of batch processing durations")
                .build(),
            totals: Totals::default(),
        }
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn totals(&self) -> DispatchTotals {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let totals = &self.totals;

        DispatchTotals {
            received: load(&totals.received),
            received_bytes: load(&totals.received_bytes),
            sent: load(&totals.sent),
            sent_bytes: load(&totals.sent_bytes),
            attachments: load(&totals.attachments),
            attachment_bytes: load(&totals.attachment_bytes),
            sent_with_attachment: load(&totals.sent_with_attachment),
            resent: load(&totals.resent),
            max_retries_reached: load(&totals.max_retries_reached),
            failed: load(&totals.failed),
            batches: load(&totals.batches),
        }
    }
}

impl DispatchRecorder for DispatchMetrics {
    fn record_received(&self, count: u64, bytes: u64) {
        self.received.add(count, &[]);
        self.received_bytes.add(bytes, &[]);
        self.totals.received.fetch_add(count, Ordering::Relaxed);
        self.totals.received_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_sent(&self, count: u64, bytes: u64) {
        self.sent.add(count, &[]);
        self.sent_bytes.add(bytes, &[]);
        self.totals.sent.fetch_add(count, Ordering::Relaxed);
        self.totals.sent_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_attachments(&self, count: u64, bytes: u64) {
        self.attachments.add(count, &[]);
        if count > 0 {
            self.attachment_size_bytes.record(bytes, &[]);
        }
        self.totals.attachments.fetch_add(count, Ordering::Relaxed);
        self.totals.attachment_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_sent_with_attachment(&self, count: u64) {
        self.sent_with_attachment.add(count, &[]);
        self.totals
            .sent_with_attachment
            .fetch_add(count, Ordering::Relaxed);
    }

    fn record_resent(&self, count: u64) {
        self.resent.add(count, &[]);
        self.totals.resent.fetch_add(count, Ordering::Relaxed);
    }

    fn record_max_retries_reached(&self, count: u64) {
        self.max_retries_reached.add(count, &[]);
        self.totals
            .max_retries_reached
            .fetch_add(count, Ordering::Relaxed);
    }

    fn record_failed(&self, count: u64) {
        self.failed.add(count, &[]);
        self.totals.failed.fetch_add(count, Ordering::Relaxed);
    }

    fn record_processing_time(&self, elapsed: Duration) {
        self.processing_duration.record(elapsed.as_secs_f64(), &[]);
        self.totals.batches.fetch_add(1, Ordering::Relaxed);
    }
}
