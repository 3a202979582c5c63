//! A minimal SMTP submission client.
//!
//! The client speaks just enough SMTP for submission: greeting, EHLO,
//! STARTTLS, AUTH PLAIN, one or more MAIL/RCPT/DATA transactions and QUIT.
//! Responses are parsed from a growable buffer so multi-line replies that
//! arrive in pieces are handled.

mod connection;
mod error;
mod response;

use base64::{Engine, engine::general_purpose::STANDARD};

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};

use connection::ClientConnection;

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Connect over plain TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection fails.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr).await?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
        })
    }

    /// Accept any server certificate during STARTTLS. Testing only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Returns `true` once STARTTLS has completed.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.connection, Some(ClientConnection::Tls(_)))
    }

    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data)
            .await
    }

    /// Send a command line and read its response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send(format!("{command}\r\n").as_bytes()).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// Send STARTTLS and, if the server agrees, upgrade the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the command or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            self.connection = Some(
                connection
                    .upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                    .await?,
            );
            // Anything buffered before the handshake is stale
            self.buffer_pos = 0;
        }

        Ok(response)
    }

    /// AUTH PLAIN (RFC 4616) with an empty authorisation identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        self.command(&format!("AUTH PLAIN {token}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Transmit message content, dot-stuffed and terminated with
    /// `<CRLF>.<CRLF>`.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<Response> {
        let mut payload = dot_stuff(data);

        if !payload.ends_with(b"\r\n") {
            if payload.ends_with(b"\n") {
                payload.pop();
            }
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(b".\r\n");

        self.send(&payload).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Double every `.` that starts a line (RFC 5321 §4.5.2).
#[must_use]
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut stuffed = Vec::with_capacity(data.len() + data.len() / 64);
    let mut line_start = true;

    for &byte in data {
        if line_start && byte == b'.' {
            stuffed.push(b'.');
        }
        stuffed.push(byte);
        line_start = byte == b'\n';
    }

    stuffed
}
