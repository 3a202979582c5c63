//! The consumer lifecycle.
//!
//! [`Courier::run`] starts the broker supervisor and the attachment sweeper,
//! declares the queue, then loops: wait for the broker, open a consumer, and
//! feed its deliveries through a [`BatchCollector`] that spawns one dispatch
//! task per batch. A delivery stream cannot be restarted, so a fresh consumer
//! is opened after every reconnect.
//!
//! On shutdown accumulation stops, the last partial batch is flushed and
//! in-flight dispatches get [`DRAIN_TIMEOUT`] to finish before the connection
//! is closed.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use courier_broker::{BrokerConnection, Delivery};
use courier_cache::{AttachmentCache, S3ObjectStore};
use courier_common::{Signal, internal, logging};
use courier_dispatch::{BatchCollector, DispatchStatus, EmailDispatcher};
use courier_metrics::{init_metrics, shutdown_metrics};
use courier_smtp::SmtpTransport;
use futures_util::StreamExt;
use tokio::{sync::broadcast, task::JoinSet};

use crate::CourierConfig;

/// How long in-flight dispatches may run once shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

#[derive(Debug)]
pub struct Courier {
    config: CourierConfig,
}

impl Courier {
    #[must_use]
    pub const fn new(config: CourierConfig) -> Self {
        Self { config }
    }

    /// Run until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics cannot be initialised or the queue cannot
    /// be declared.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        internal!(level = INFO, "Courier starting, consuming {}", self.config.queue);

        let recorder = init_metrics(&self.config.metrics)?;

        let connection = BrokerConnection::new(self.config.broker.clone());
        let supervisor = tokio::spawn(Arc::clone(&connection).run());

        let store = S3ObjectStore::from_config(&self.config.storage).await;
        let cache = Arc::new(AttachmentCache::new(
            Arc::new(store),
            self.config.cache.clone(),
        ));
        let sweeper = tokio::spawn(Arc::clone(&cache).run_sweeper(SHUTDOWN_BROADCAST.subscribe()));

        let dispatcher = EmailDispatcher::new(
            (&self.config.sender).into(),
            cache,
            Arc::new(SmtpTransport::new(self.config.smtp.clone())),
        )
        .with_templates(Arc::new(self.config.templates()))
        .with_recorder(recorder)
        .with_max_retries(self.config.broker.max_retries);

        let signals = tokio::spawn(shutdown());

        let result = self
            .serve(&connection, Arc::new(dispatcher), SHUTDOWN_BROADCAST.subscribe())
            .await;

        internal!(level = INFO, "Shutting down...");

        signals.abort();
        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        let _ = sweeper.await;

        shutdown_metrics();
        connection.shutdown();
        match supervisor.await {
            Ok(Err(err)) => internal!(level = WARN, "Broker supervisor stopped: {err}"),
            Err(err) => internal!(level = WARN, "Broker supervisor panicked: {err}"),
            Ok(Ok(())) => {}
        }

        let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
        result
    }

    /// Consume, collect and dispatch until shutdown, then drain.
    async fn serve(
        &self,
        connection: &BrokerConnection,
        dispatcher: Arc<EmailDispatcher>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let queue = self.config.queue.as_str();
        let prefetch = self.config.broker.prefetch;
        let retry_delay = Duration::from_millis(self.config.broker.reconnect_base_delay_ms);
        let mut tasks = JoinSet::new();

        tokio::select! {
            biased;
            _ = shutdown.recv() => return Ok(()),
            connected = connection.wait_connected() => connected?,
        }

        connection
            .declare_queue_with_dead_letter(queue, self.config.broker.max_retries)
            .await?;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                connected = connection.wait_connected() => {
                    if connected.is_err() {
                        break;
                    }
                }
            }

            let deliveries = match connection.consume(queue, prefetch).await {
                Ok(deliveries) => deliveries,
                Err(err) => {
                    internal!(level = WARN, "Failed to consume {queue}: {err}");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(retry_delay) => continue,
                    }
                }
            };

            let stopped = {
                let mut deliveries = deliveries.take_until(Box::pin(shutdown.recv()));
                BatchCollector::new(&self.config.batch)
                    .run(&mut deliveries, |batch: Vec<Delivery>| {
                        reap(&mut tasks);
                        let dispatcher = Arc::clone(&dispatcher);
                        tasks.spawn(async move { dispatcher.dispatch(&batch).await });
                    })
                    .await;
                deliveries.is_stopped()
            };

            if stopped {
                break;
            }

            internal!(level = WARN, "Delivery stream for {queue} ended, waiting for the broker");
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(retry_delay) => {}
            }
        }

        drain(tasks).await;
        Ok(())
    }
}

/// Collect dispatch tasks that have already finished.
fn reap(tasks: &mut JoinSet<DispatchStatus>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(err) = result {
            internal!(level = ERROR, "Dispatch task failed: {err}");
        }
    }
}

async fn drain(mut tasks: JoinSet<DispatchStatus>) {
    if tasks.is_empty() {
        return;
    }

    internal!(level = INFO, "Waiting for {} dispatches to finish", tasks.len());

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                internal!(level = ERROR, "Dispatch task failed: {err}");
            }
        }
    })
    .await;

    if drained.is_err() {
        internal!(
            level = WARN,
            "Abandoning {} dispatches after {DRAIN_TIMEOUT:?}; their deliveries will be redelivered",
            tasks.len()
        );
        tasks.abort_all();
    }
}
