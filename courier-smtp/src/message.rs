//! Message construction.
//!
//! [`MessageBuilder`] produces an [`OutboundMessage`]: the SMTP envelope plus
//! the RFC 5322 content. Text is sent as-is when it is 7-bit clean with short
//! lines, otherwise base64; attachments always use base64 inside a
//! `multipart/mixed` body. Bcc recipients only appear in the envelope.

use std::{fmt::Write, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::Recipient;
use ulid::Ulid;

use crate::client::ClientError;

/// Longest line allowed by RFC 5321, excluding CRLF.
const MAX_LINE_LENGTH: usize = 998;

/// Base64 line width for MIME bodies.
const BASE64_LINE_LENGTH: usize = 76;

/// A display name and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: (!name.is_empty()).then_some(name),
            address: address.into(),
        }
    }

    pub fn address_only(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    fn domain(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map_or("localhost", |(_, domain)| domain)
    }

    /// Header form: `"Name" <addr>`, with RFC 2047 encoding for names that
    /// are not printable ASCII.
    fn header_value(&self) -> String {
        match &self.name {
            None => format!("<{}>", self.address),
            Some(name) if needs_encoding(name) => {
                format!("{} <{}>", encode_word(name), self.address)
            }
            Some(name) => format!("\"{}\" <{}>", escape_quoted(name), self.address),
        }
    }
}

impl From<&Recipient> for Mailbox {
    fn from(recipient: &Recipient) -> Self {
        Self::new(recipient.name.clone(), recipient.email.clone())
    }
}

/// A ready-to-send message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Envelope sender (`MAIL FROM`)
    pub from: String,
    /// Envelope recipients (`RCPT TO`), visible and blind
    pub recipients: Vec<String>,
    /// Message content with CRLF line endings, not yet dot-stuffed
    pub data: Vec<u8>,
}

impl OutboundMessage {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Attachment {
    filename: String,
    content_type: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    from: Mailbox,
    to: Vec<Mailbox>,
    bcc: Vec<Mailbox>,
    subject: String,
    body: String,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub const fn new(from: Mailbox) -> Self {
        Self {
            from,
            to: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn to(mut self, mailbox: Mailbox) -> Self {
        self.to.push(mailbox);
        self
    }

    /// Envelope-only recipient.
    #[must_use]
    pub fn bcc(mut self, mailbox: Mailbox) -> Self {
        self.bcc.push(mailbox);
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach `data`, guessing the content type from `filename`.
    #[must_use]
    pub fn attach(mut self, filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let filename = filename.into();
        self.attachments.push(Attachment {
            content_type: guess_content_type(&filename).to_string(),
            filename,
            data: data.into(),
        });
        self
    }

    /// # Errors
    ///
    /// Returns `ClientError::BuilderError` when there are no recipients.
    pub fn build(self) -> Result<OutboundMessage, ClientError> {
        if self.to.is_empty() && self.bcc.is_empty() {
            return Err(ClientError::BuilderError("No recipients".to_string()));
        }

        let mut message = String::with_capacity(1024 + self.body.len());
        self.write_headers(&mut message)?;

        if self.attachments.is_empty() {
            write_text_part(&mut message, &self.body)?;
        } else {
            let boundary = format!("courier-{}", Ulid::new());
            write!(
                message,
                "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
            )?;

            write!(message, "--{boundary}\r\n")?;
            write_text_part(&mut message, &self.body)?;
            message.push_str("\r\n");

            for attachment in &self.attachments {
                let filename = quoted_parameter(&attachment.filename);
                write!(
                    message,
                    "--{boundary}\r\nContent-Type: {}; name={filename}\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: attachment; filename={filename}\r\n\r\n",
                    attachment.content_type,
                )?;
                message.push_str(&base64_lines(&attachment.data));
            }

            write!(message, "--{boundary}--\r\n")?;
        }

        Ok(OutboundMessage {
            from: self.from.address,
            recipients: self
                .to
                .into_iter()
                .chain(self.bcc)
                .map(|mailbox| mailbox.address)
                .collect(),
            data: message.into_bytes(),
        })
    }

    fn write_headers(&self, message: &mut String) -> std::fmt::Result {
        write!(message, "From: {}\r\n", self.from.header_value())?;
        if !self.to.is_empty() {
            let to = self
                .to
                .iter()
                .map(Mailbox::header_value)
                .collect::<Vec<_>>()
                .join(", ");
            write!(message, "To: {to}\r\n")?;
        }
        write!(message, "Subject: {}\r\n", encode_header(&self.subject))?;
        write!(message, "Date: {}\r\n", chrono::Utc::now().to_rfc2822())?;
        write!(
            message,
            "Message-ID: <{}@{}>\r\n",
            Ulid::new(),
            self.from.domain()
        )?;
        message.push_str("MIME-Version: 1.0\r\n");
        Ok(())
    }
}

impl From<std::fmt::Error> for ClientError {
    fn from(err: std::fmt::Error) -> Self {
        Self::BuilderError(err.to_string())
    }
}

/// Write a UTF-8 `text/plain` part: headers, blank line and body.
fn write_text_part(message: &mut String, body: &str) -> std::fmt::Result {
    let body = normalise_newlines(body);
    let seven_bit = body.is_ascii() && body.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH);

    if seven_bit {
        write!(
            message,
            "Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 7bit\r\n\r\n{body}"
        )?;
        if !body.ends_with("\r\n") {
            message.push_str("\r\n");
        }
    } else {
        write!(
            message,
            "Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
            base64_lines(body.as_bytes())
        )?;
    }
    Ok(())
}

fn normalise_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Base64 in CRLF-terminated lines of 76 characters.
fn base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LENGTH * 2 + 2);

    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
        // base64 output is ASCII
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }
    wrapped
}

/// RFC 2047 `B` encoded-word.
fn encode_word(text: &str) -> String {
    format!("=?utf-8?B?{}?=", STANDARD.encode(text))
}

/// Anything but printable ASCII (plus space) has to go through an
/// encoded-word.
fn needs_encoding(value: &str) -> bool {
    value.chars().any(|c| !(c == ' ' || c.is_ascii_graphic()))
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A MIME parameter value, always quoted. Values that cannot be quoted as-is
/// carry an encoded-word, which mail clients accept for filenames.
fn quoted_parameter(value: &str) -> String {
    if needs_encoding(value) {
        format!("\"{}\"", encode_word(value))
    } else {
        format!("\"{}\"", escape_quoted(value))
    }
}

fn encode_header(value: &str) -> String {
    let value = value.replace(['\r', '\n'], " ");
    if value.is_ascii() { value } else { encode_word(&value) }
}

/// Content type by file extension.
#[must_use]
pub fn guess_content_type(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match extension.to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ics" => "text/calendar",
        _ => "application/octet-stream",
    }
}
