use std::sync::Arc;

use courier_broker::Delivery;
use courier_cache::AttachmentCache;
use courier_common::{Email, TemplateRef, ValidationError, incoming, internal, outgoing};
use courier_metrics::{DispatchRecorder, NoopRecorder};
use courier_smtp::{Mailbox, MessageBuilder, OutboundMessage, Transport, TransportError};
use futures_util::future::{join_all, try_join_all};
use tokio::time::Instant;

use crate::{
    DispatchError, DispatchStatus, MemoryTemplates, TemplateError, TemplateSource, expand,
};

/// Default redelivery ceiling, matching the broker's default delivery limit.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// An item that made it through materialisation.
#[derive(Debug, Clone, Copy)]
struct Prepared {
    /// Position of the delivery in the batch
    index: usize,
    attachments: u64,
    attachment_bytes: u64,
}

/// Items that failed a stage, by position in the batch.
type Failures = Vec<(usize, DispatchError)>;

/// Runs a batch of deliveries through decode, materialize, transmit and
/// acknowledge.
///
/// Each stage only sees the items that passed the previous one. Every item
/// that fails before it is sent is requeued exactly once; items that were
/// sent are acknowledged exactly once, and if that acknowledgment fails they
/// are reported but not requeued.
pub struct EmailDispatcher {
    sender: Mailbox,
    cache: Arc<AttachmentCache>,
    transport: Arc<dyn Transport>,
    templates: Arc<dyn TemplateSource>,
    recorder: Arc<dyn DispatchRecorder>,
    max_retries: u32,
}

impl std::fmt::Debug for EmailDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailDispatcher")
            .field("sender", &self.sender)
            .field("cache", &self.cache)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl EmailDispatcher {
    pub fn new(sender: Mailbox, cache: Arc<AttachmentCache>, transport: Arc<dyn Transport>) -> Self {
        Self {
            sender,
            cache,
            transport,
            templates: Arc::new(MemoryTemplates::new()),
            recorder: Arc::new(NoopRecorder),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateSource>) -> Self {
        self.templates = templates;
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn DispatchRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Deliveries redelivered at least this many times count as having hit
    /// the ceiling.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Process one batch end to end.
    #[tracing::instrument(skip_all, fields(size = batch.len()))]
    pub async fn dispatch(&self, batch: &[Delivery]) -> DispatchStatus {
        let started = Instant::now();
        self.record_received(batch);

        let mut failed = Failures::new();

        let decoded = Self::decode(batch, &mut failed);
        let (prepared, messages) = self.materialize(decoded, &mut failed).await;
        let transmitted = self.transmit(prepared, &messages, &mut failed).await;
        let sent = Self::acknowledge(batch, &transmitted, &mut failed).await;

        debug_assert_eq!(sent + failed.len(), batch.len());

        let requeued = Self::requeue(batch, &failed).await;
        self.recorder.record_failed(requeued as u64);
        self.recorder.record_processing_time(started.elapsed());

        let status =
            DispatchStatus::from_errors(sent, failed.into_iter().map(|(_, err)| err.to_string()));
        if status.failed == 0 {
            internal!(level = INFO, "Dispatched batch: {status}");
        } else {
            internal!(level = WARN, "Dispatched batch: {status}");
        }

        status
    }

    fn record_received(&self, batch: &[Delivery]) {
        let bytes = batch.iter().map(|d| d.len() as u64).sum();
        self.recorder.record_received(batch.len() as u64, bytes);

        let resent = batch.iter().filter(|d| d.delivery_count() > 0).count();
        if resent > 0 {
            self.recorder.record_resent(resent as u64);
        }

        let exhausted = batch
            .iter()
            .filter(|d| d.delivery_count() >= self.max_retries)
            .count();
        if exhausted > 0 {
            incoming!(
                level = WARN,
                "{exhausted} deliveries reached the redelivery ceiling of {}",
                self.max_retries
            );
            self.recorder.record_max_retries_reached(exhausted as u64);
        }
    }

    fn decode(batch: &[Delivery], failed: &mut Failures) -> Vec<(usize, Email)> {
        batch
            .iter()
            .enumerate()
            .filter_map(|(index, delivery)| match Email::decode(delivery.body()) {
                Ok(email) => Some((index, email)),
                Err(err) => {
                    incoming!(level = WARN, "Rejected delivery {index}: {err}");
                    failed.push((index, err.into()));
                    None
                }
            })
            .collect()
    }

    async fn materialize(
        &self,
        decoded: Vec<(usize, Email)>,
        failed: &mut Failures,
    ) -> (Vec<Prepared>, Vec<OutboundMessage>) {
        let results = join_all(
            decoded
                .into_iter()
                .map(|(index, email)| async move { (index, self.prepare(index, &email).await) }),
        )
        .await;

        let mut prepared = Vec::with_capacity(results.len());
        let mut messages = Vec::with_capacity(results.len());

        for (index, result) in results {
            match result {
                Ok((item, message)) => {
                    prepared.push(item);
                    messages.push(message);
                }
                Err(err) if err.is_transient() => {
                    internal!(level = WARN, "Failed to build message {index}: {err}");
                    failed.push((index, err));
                }
                Err(err) => {
                    internal!(level = ERROR, "Failed to build message {index}: {err}");
                    failed.push((index, err));
                }
            }
        }

        (prepared, messages)
    }

    async fn prepare(
        &self,
        index: usize,
        email: &Email,
    ) -> Result<(Prepared, OutboundMessage), DispatchError> {
        let body = self.body(email)?;
        let attachments = try_join_all(email.attachments.iter().map(|name| self.cache.get(name)))
            .await?;

        let mut builder = MessageBuilder::new(self.sender.clone())
            .subject(email.subject.clone())
            .body(body);

        for recipient in &email.receivers {
            builder = builder.to(recipient.into());
        }
        for recipient in &email.blind_receivers {
            builder = builder.bcc(recipient.into());
        }

        let mut attachment_bytes = 0;
        for (name, data) in email.attachments.iter().zip(&attachments) {
            attachment_bytes += data.len() as u64;
            builder = builder.attach(name.clone(), data.to_vec());
        }

        let item = Prepared {
            index,
            attachments: attachments.len() as u64,
            attachment_bytes,
        };

        Ok((item, builder.build()?))
    }

    fn body(&self, email: &Email) -> Result<String, DispatchError> {
        match (&email.message, &email.template) {
            (Some(message), None) => Ok(message.clone()),
            (None, Some(TemplateRef { name, data })) => {
                let template = self
                    .templates
                    .template(name)
                    .ok_or_else(|| TemplateError::Unknown(name.clone()))?;
                Ok(expand(name, &template, data)?)
            }
            _ => Err(ValidationError::BodyConflict.into()),
        }
    }

    /// Send every prepared message over a single session. Any failure moves
    /// the whole set to `failed`.
    async fn transmit(
        &self,
        prepared: Vec<Prepared>,
        messages: &[OutboundMessage],
        failed: &mut Failures,
    ) -> Vec<Prepared> {
        if prepared.is_empty() {
            return prepared;
        }

        match self.send(messages).await {
            Ok(()) => {
                let bytes = messages.iter().map(|m| m.len() as u64).sum();
                self.recorder.record_sent(messages.len() as u64, bytes);

                let attachments = prepared.iter().map(|p| p.attachments).sum();
                let attachment_bytes = prepared.iter().map(|p| p.attachment_bytes).sum();
                self.recorder
                    .record_attachments(attachments, attachment_bytes);

                let with_attachment = prepared.iter().filter(|p| p.attachments > 0).count();
                self.recorder
                    .record_sent_with_attachment(with_attachment as u64);

                prepared
            }
            Err(err) if err.is_transient() => {
                outgoing!(
                    level = WARN,
                    "Failed to send {} messages, will retry: {err}",
                    messages.len()
                );
                Self::fail_all(prepared, err, failed)
            }
            Err(err) => {
                outgoing!(
                    level = ERROR,
                    "Failed to send {} messages: {err}",
                    messages.len()
                );
                Self::fail_all(prepared, err, failed)
            }
        }
    }

    /// Every item of a failed session shares the one error.
    fn fail_all(
        prepared: Vec<Prepared>,
        err: TransportError,
        failed: &mut Failures,
    ) -> Vec<Prepared> {
        let err = Arc::new(err);
        failed.extend(
            prepared
                .into_iter()
                .map(|p| (p.index, DispatchError::Transport(Arc::clone(&err)))),
        );
        Vec::new()
    }

    async fn send(&self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        let mut session = self.transport.open().await?;
        session.send_all(messages).await?;

        outgoing!(level = DEBUG, "Sent {} messages", messages.len());

        // Every message was accepted by this point.
        if let Err(err) = session.close().await {
            outgoing!(level = WARN, "Failed to close SMTP session cleanly: {err}");
        }

        Ok(())
    }

    async fn acknowledge(batch: &[Delivery], sent: &[Prepared], failed: &mut Failures) -> usize {
        let mut acknowledged = 0;

        for item in sent {
            match batch[item.index].ack().await {
                Ok(()) => acknowledged += 1,
                Err(err) => {
                    incoming!(
                        level = ERROR,
                        "Delivery {} was sent but could not be acknowledged: {err}",
                        item.index
                    );
                    failed.push((item.index, DispatchError::Acknowledge(err)));
                }
            }
        }

        acknowledged
    }

    /// Nack every failure that was never sent. Returns how many there were.
    async fn requeue(batch: &[Delivery], failed: &[(usize, DispatchError)]) -> usize {
        let mut requeued = 0;

        for (index, _) in failed.iter().filter(|(_, err)| err.requeues()) {
            requeued += 1;
            if let Err(err) = batch[*index].nack_requeue().await {
                incoming!(level = ERROR, "Failed to requeue delivery {index}: {err}");
            }
        }

        requeued
    }
}
