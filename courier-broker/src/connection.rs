//! The supervised broker connection.

use std::{sync::Arc, time::Duration};

use courier_common::{incoming, internal, outgoing};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};

use crate::{
    BrokerConfig, BrokerError, ConnectionState, Deliveries,
    delivery::deliveries,
    retry::{RetryError, retry, signalled},
    topology,
};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// One physical connection and its confirm-mode control channel.
struct Link {
    connection: Connection,
    channel: Channel,
    lost: mpsc::UnboundedSender<String>,
}

impl Link {
    /// Tell the supervisor this link is no longer usable.
    fn report(&self, error: &BrokerError) {
        let _ = self.lost.send(error.to_string());
    }
}

/// A long-lived AMQP connection that redials itself.
///
/// [`BrokerConnection::run`] must be spawned for the connection to come up;
/// every other operation fails with [`BrokerError::ConnectionClosed`] (and is
/// retried where the operation allows it) while the link is down.
pub struct BrokerConnection {
    config: BrokerConfig,
    link: RwLock<Option<Arc<Link>>>,
    /// Serialises publishes on the control channel.
    publisher: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    done: watch::Sender<bool>,
}

impl BrokerConnection {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            link: RwLock::new(None),
            publisher: Mutex::new(()),
            state: watch::channel(ConnectionState::default()).0,
            done: watch::channel(false).0,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the link is up.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Shutdown`] if the connection is closed first.
    pub async fn wait_connected(&self) -> Result<(), BrokerError> {
        let mut state = self.state.subscribe();
        match state
            .wait_for(|state| state.is_connected() || state.is_terminal())
            .await
        {
            Ok(state) if state.is_connected() => Ok(()),
            _ => Err(BrokerError::Shutdown),
        }
    }

    /// Stop the supervisor and abandon any in-flight retries.
    pub fn shutdown(&self) {
        self.done.send_replace(true);
        self.state.send_replace(ConnectionState::Closing);
    }

    /// Move to `next` unless shutdown has already begun.
    fn transition(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn connect(
        &self,
        attempt: u32,
    ) -> Result<(Link, mpsc::UnboundedReceiver<String>), BrokerError> {
        self.transition(ConnectionState::Connecting);
        internal!(
            "Dialing broker at {}:{} (attempt {attempt})",
            self.config.host,
            self.config.port
        );

        let dial = async {
            let connection =
                Connection::connect_uri(self.config.uri(), ConnectionProperties::default()).await?;
            let channel = connection.create_channel().await?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
            Ok::<_, lapin::Error>((connection, channel))
        };

        // Every dial failure is retried, including refused credentials.
        let (connection, channel) = dial.await.map_err(|err| {
            internal!(level = WARN, "Unable to reach broker: {err}");
            self.transition(ConnectionState::Disconnected);
            BrokerError::Connection(err.to_string())
        })?;

        let (lost, lost_rx) = mpsc::unbounded_channel();
        let on_error = lost.clone();
        connection.on_error(move |err| {
            let _ = on_error.send(err.to_string());
        });

        Ok((
            Link {
                connection,
                channel,
                lost,
            },
            lost_rx,
        ))
    }

    /// Keep the connection up until [`BrokerConnection::shutdown`] is called.
    ///
    /// Dials with unbounded exponential backoff, then waits for the link to
    /// be reported lost (by the client library or by a failed operation) and
    /// starts over.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok(())` once shut down; the signature leaves
    /// room for fatal supervisor errors.
    #[tracing::instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn run(self: Arc<Self>) -> Result<(), BrokerError> {
        let mut done = self.done.subscribe();
        let policy = self.config.reconnect_policy();

        loop {
            if *done.borrow() {
                break;
            }

            let connected = retry(&policy, &mut done, |attempt| self.connect(attempt)).await;
            let (link, mut lost) = match connected {
                Ok(link) => link,
                Err(RetryError::Shutdown(_)) => break,
                Err(err) => {
                    let err = BrokerError::from(err);
                    internal!(level = ERROR, "Broker supervisor stopped: {err}");
                    self.close().await;
                    return Err(err);
                }
            };

            if *done.borrow() {
                let _ = link.connection.close(REPLY_SUCCESS, "shutdown").await;
                break;
            }

            *self.link.write().await = Some(Arc::new(link));
            self.transition(ConnectionState::Connected);
            internal!(
                level = INFO,
                "Connected to broker at {}:{}",
                self.config.host,
                self.config.port
            );

            tokio::select! {
                biased;

                () = signalled(&mut done) => break,
                reason = lost.recv() => {
                    let reason = reason.unwrap_or_else(|| "link dropped".to_string());
                    internal!(level = WARN, "Lost broker connection: {reason}");
                    let stale = self.link.write().await.take();
                    if let Some(stale) = stale {
                        let _ = stale.connection.close(REPLY_SUCCESS, "reconnecting").await;
                    }
                    self.transition(ConnectionState::Disconnected);
                }
            }
        }

        self.close().await;
        internal!(level = INFO, "Broker connection closed");
        Ok(())
    }

    async fn close(&self) {
        self.state.send_replace(ConnectionState::Closing);
        let link = self.link.write().await.take();
        if let Some(link) = link {
            if let Err(err) = link.connection.close(REPLY_SUCCESS, "shutdown").await {
                internal!(level = DEBUG, "Error closing broker connection: {err}");
            }
        }
    }

    async fn current_link(&self) -> Result<Arc<Link>, BrokerError> {
        self.link
            .read()
            .await
            .clone()
            .ok_or(BrokerError::ConnectionClosed)
    }

    /// Publish `payload` as persistent JSON to `queue` on the default
    /// exchange and wait for the broker's confirmation.
    ///
    /// The payload is serialised once; only the send is retried.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Serialization`] immediately if `payload` cannot be
    ///   encoded
    /// - [`BrokerError::MaxRetries`] holding each attempt's error once the
    ///   publish policy is exhausted
    /// - [`BrokerError::Shutdown`] if the connection is closed mid-retry
    #[tracing::instrument(skip(self, payload))]
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(payload)?;
        let mut done = self.done.subscribe();

        retry(&self.config.publish_policy(), &mut done, |attempt| {
            self.publish_once(queue, &body, attempt)
        })
        .await
        .map_err(BrokerError::from)
    }

    async fn publish_once(&self, queue: &str, body: &[u8], attempt: u32) -> Result<(), BrokerError> {
        let link = match self.current_link().await {
            Ok(link) => link,
            Err(err) => {
                outgoing!(level = DEBUG, "Publish attempt {attempt} to {queue}: {err}");
                return Err(err);
            }
        };
        let _guard = self.publisher.lock().await;
        let timeout = self.config.publish_timeout();

        let send = async {
            let properties = BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type("application/json".into());
            let confirm = link
                .channel
                .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
                .await?;

            if confirm.await?.is_nack() {
                return Err(BrokerError::NotConfirmed);
            }
            Ok::<(), BrokerError>(())
        };

        let result = tokio::time::timeout(timeout, send)
            .await
            .unwrap_or(Err(BrokerError::Timeout(timeout)));

        if let Err(err) = &result {
            outgoing!(level = WARN, "Publish attempt {attempt} to {queue} failed: {err}");
            if err.is_connection_lost() {
                link.report(err);
            }
        }
        result
    }

    /// Declare `queue` together with its dead-letter exchange and queue.
    ///
    /// Idempotent against an existing, identically configured topology.
    /// Every call is bounded by the declare timeout and the whole sequence is
    /// retried under the declare policy.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Protocol`] at once if the broker rejects the
    ///   arguments (e.g. the queue exists with a different type)
    /// - [`BrokerError::MaxRetries`] once the declare policy is exhausted
    #[tracing::instrument(skip(self))]
    pub async fn declare_queue_with_dead_letter(
        &self,
        queue: &str,
        max_retries: u32,
    ) -> Result<(), BrokerError> {
        let mut done = self.done.subscribe();

        retry(&self.config.declare_policy(), &mut done, |attempt| {
            self.declare_once(queue, max_retries, attempt)
        })
        .await
        .map_err(BrokerError::from)?;

        internal!(
            level = INFO,
            "Declared {queue} with dead-letter queue {}",
            topology::dead_letter_name(queue)
        );
        Ok(())
    }

    async fn declare_once(
        &self,
        queue: &str,
        max_retries: u32,
        attempt: u32,
    ) -> Result<(), BrokerError> {
        let link = self.current_link().await?;
        let timeout = self.config.declare_timeout();

        // Rejected declarations close the channel they were made on, so they
        // never touch the control channel.
        let channel = tokio::time::timeout(timeout, link.connection.create_channel())
            .await
            .map_err(|_| BrokerError::DeclareTimeout(timeout))??;

        let result = Self::declare_topology(&channel, queue, max_retries, timeout).await;

        if let Err(err) = &result {
            internal!(level = WARN, "Declare attempt {attempt} for {queue} failed: {err}");
            if err.is_connection_lost() {
                link.report(err);
            }
        }
        let _ = channel.close(REPLY_SUCCESS, "declared").await;
        result
    }

    async fn declare_topology(
        channel: &Channel,
        queue: &str,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let dead_letter = topology::dead_letter_name(queue);
        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        bounded(
            timeout,
            channel.exchange_declare(
                &dead_letter,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            ),
        )
        .await?;

        bounded(
            timeout,
            channel.queue_declare(&dead_letter, durable_queue, topology::dead_letter_queue_arguments()),
        )
        .await?;

        bounded(
            timeout,
            channel.queue_bind(
                &dead_letter,
                &dead_letter,
                topology::DEAD_LETTER_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            ),
        )
        .await?;

        bounded(
            timeout,
            channel.queue_declare(
                queue,
                durable_queue,
                topology::primary_queue_arguments(queue, max_retries),
            ),
        )
        .await?;

        Ok(())
    }

    /// Start consuming `queue` on a fresh channel that allows at most
    /// `prefetch` unacknowledged deliveries.
    ///
    /// # Errors
    ///
    /// Fails if the link is down or the broker refuses the consumer.
    #[tracing::instrument(skip(self))]
    pub async fn consume(&self, queue: &str, prefetch: u16) -> Result<Deliveries, BrokerError> {
        let link = self.current_link().await?;

        let opened = async {
            let channel = link.connection.create_channel().await?;
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await?;
            let consumer = channel
                .basic_consume(queue, "", BasicConsumeOptions::default(), FieldTable::default())
                .await?;
            Ok::<_, lapin::Error>((consumer, channel))
        };

        match opened.await {
            Ok((consumer, channel)) => {
                incoming!(level = INFO, "Consuming {queue} with prefetch {prefetch}");
                Ok(deliveries(consumer, channel))
            }
            Err(err) => {
                let err = BrokerError::from(err);
                if err.is_connection_lost() {
                    link.report(&err);
                }
                Err(err)
            }
        }
    }
}

/// Bound a single declare call by `timeout`.
async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = lapin::Result<T>>,
) -> Result<T, BrokerError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| BrokerError::DeclareTimeout(timeout))?
        .map_err(BrokerError::from)
}
