//! The batch transport seam and its SMTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use courier_common::outgoing;

use crate::{
    OutboundMessage, SmtpConfig, TransportError,
    client::{ClientError, Response, SmtpClient},
};

/// Opens sessions. One session is used per batch.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Any error here fails every message in the batch.
    async fn open(&self) -> Result<Box<dyn Session>, TransportError>;
}

/// An established, authenticated session.
#[async_trait]
pub trait Session: Send {
    /// Send every message in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failure; no per-message outcome is reported.
    async fn send_all(&mut self, messages: &[OutboundMessage]) -> Result<(), TransportError>;

    /// End the session politely.
    ///
    /// # Errors
    ///
    /// Returns an error if QUIT could not be sent.
    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// Bound `call` by `limit`.
async fn timed<T>(
    command: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, TransportError> {
    Ok(tokio::time::timeout(limit, call)
        .await
        .map_err(|_| TransportError::Timeout(command, limit))??)
}

fn expect_success(command: &'static str, response: &Response) -> Result<(), TransportError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(TransportError::Rejected {
            command,
            code: response.code,
            message: response.message(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        if config.accept_invalid_certs {
            outgoing!(
                level = WARN,
                "SECURITY WARNING: certificate validation is disabled for {}",
                config.host
            );
        }
        if !config.require_tls {
            outgoing!(
                level = WARN,
                "SECURITY WARNING: mail to {} may be sent without TLS",
                config.host
            );
        }
        Self { config }
    }

    async fn handshake(&self) -> Result<SmtpClient, TransportError> {
        let config = &self.config;
        let timeouts = &config.timeouts;
        let server = config.address();

        let connect = async {
            let mut client = SmtpClient::connect(&server, config.host.clone())
                .await?
                .accept_invalid_certs(config.accept_invalid_certs);
            let greeting = client.read_greeting().await?;
            Ok::<_, ClientError>((client, greeting))
        };

        let (mut client, greeting) = tokio::time::timeout(timeouts.connect(), connect)
            .await
            .map_err(|_| TransportError::Timeout("connect", timeouts.connect()))?
            .map_err(|err| TransportError::Connect {
                server: server.clone(),
                reason: err.to_string(),
            })?;

        if !greeting.is_success() {
            return Err(TransportError::Connect {
                server,
                reason: format!("{} {}", greeting.code, greeting.message()),
            });
        }

        let hello = config.hello_name();
        let mut ehlo = timed("EHLO", timeouts.handshake(), client.ehlo(hello)).await?;
        expect_success("EHLO", &ehlo)?;

        if ehlo.advertises("STARTTLS") {
            let response = timed("STARTTLS", timeouts.handshake(), client.starttls())
                .await
                .map_err(|err| TransportError::TlsRequired(err.to_string()))?;
            if !response.is_success() {
                return Err(TransportError::TlsRequired(format!(
                    "server refused STARTTLS: {} {}",
                    response.code,
                    response.message()
                )));
            }

            ehlo = timed("EHLO", timeouts.handshake(), client.ehlo(hello)).await?;
            expect_success("EHLO", &ehlo)?;
        } else if config.require_tls {
            return Err(TransportError::TlsRequired(format!(
                "{server} does not advertise STARTTLS"
            )));
        }

        if let Some(username) = &config.username {
            let password = config.password.as_deref().unwrap_or_default();
            let response = timed(
                "AUTH",
                timeouts.handshake(),
                client.auth_plain(username, password),
            )
            .await?;

            if !response.is_success() {
                return Err(TransportError::AuthenticationFailed(format!(
                    "{} {}",
                    response.code,
                    response.message()
                )));
            }
        }

        outgoing!(
            level = DEBUG,
            "SMTP session open with {server} (tls: {})",
            client.is_tls()
        );
        Ok(client)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    #[tracing::instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    async fn open(&self) -> Result<Box<dyn Session>, TransportError> {
        let client = self.handshake().await.inspect_err(|err| {
            outgoing!(level = WARN, "Unable to open SMTP session: {err}");
        })?;

        Ok(Box::new(SmtpSession {
            client,
            config: self.config.clone(),
        }))
    }
}

struct SmtpSession {
    client: SmtpClient,
    config: SmtpConfig,
}

impl SmtpSession {
    async fn send_one(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let timeouts = &self.config.timeouts;

        let response = timed(
            "MAIL FROM",
            timeouts.envelope(),
            self.client.mail_from(&message.from),
        )
        .await?;
        expect_success("MAIL FROM", &response)?;

        for recipient in &message.recipients {
            let response =
                timed("RCPT TO", timeouts.envelope(), self.client.rcpt_to(recipient)).await?;
            expect_success("RCPT TO", &response)?;
        }

        let response = timed("DATA", timeouts.data(), self.client.data()).await?;
        if !response.is_intermediate() {
            return Err(TransportError::Rejected {
                command: "DATA",
                code: response.code,
                message: response.message(),
            });
        }

        let response =
            timed("DATA", timeouts.data(), self.client.send_data(&message.data)).await?;
        expect_success("DATA", &response)
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn send_all(&mut self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        for (index, message) in messages.iter().enumerate() {
            self.send_one(message).await.inspect_err(|err| {
                outgoing!(
                    level = WARN,
                    "Session failed on message {} of {}: {err}",
                    index + 1,
                    messages.len()
                );
            })?;
            outgoing!(
                "Sent message {} of {} ({} bytes)",
                index + 1,
                messages.len(),
                message.len()
            );
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        let mut session = self;
        let limit = session.config.timeouts.quit();
        timed("QUIT", limit, session.client.quit()).await?;
        Ok(())
    }
}
