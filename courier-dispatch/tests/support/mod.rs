//! Test doubles for the dispatch pipeline: recording acknowledgers and a
//! scriptable transport.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use courier_broker::{Acknowledge, BrokerError, Delivery};
use courier_smtp::{OutboundMessage, Session, Transport, TransportError};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Nack,
}

/// Records every ack/nack issued for one delivery.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
    fail_ack: bool,
}

impl Recorder {
    pub fn failing_ack() -> Self {
        Self {
            fail_ack: true,
            ..Default::default()
        }
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Acknowledge for Recorder {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.outcomes.lock().unwrap().push(Outcome::Ack);
        if self.fail_ack {
            Err(BrokerError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn nack_requeue(&self) -> Result<(), BrokerError> {
        self.outcomes.lock().unwrap().push(Outcome::Nack);
        Ok(())
    }
}

pub fn delivery(body: impl Into<Vec<u8>>) -> (Delivery, Recorder) {
    delivery_with(body, 0, Recorder::default())
}

pub fn delivery_with(
    body: impl Into<Vec<u8>>,
    delivery_count: u32,
    recorder: Recorder,
) -> (Delivery, Recorder) {
    (
        Delivery::new(body.into(), delivery_count, recorder.clone()),
        recorder,
    )
}

/// A valid email body addressed to `to`.
pub fn email(to: &str) -> Vec<u8> {
    json!({
        "receivers": [{ "name": "Receiver", "email": to }],
        "subject": "Hello",
        "message": "Hi there",
    })
    .to_string()
    .into_bytes()
}

pub fn email_with_attachments(to: &str, attachments: &[&str]) -> Vec<u8> {
    json!({
        "receivers": [{ "name": "Receiver", "email": to }],
        "subject": "Hello",
        "message": "See attached",
        "attachments": attachments,
    })
    .to_string()
    .into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    Open,
    Send,
}

/// Keeps every message it is asked to send.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    failure: Failure,
    opened: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Vec<OutboundMessage>>>>,
}

impl FakeTransport {
    pub fn new(failure: Failure) -> Self {
        Self {
            failure,
            opened: Arc::default(),
            sent: Arc::default(),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Messages grouped by session.
    pub fn sessions(&self) -> Vec<Vec<OutboundMessage>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self) -> Result<Box<dyn Session>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        if self.failure == Failure::Open {
            return Err(TransportError::Connect {
                server: "smtp.example.com:587".to_string(),
                reason: "Connection refused".to_string(),
            });
        }

        Ok(Box::new(FakeSession {
            failure: self.failure,
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct FakeSession {
    failure: Failure,
    sent: Arc<Mutex<Vec<Vec<OutboundMessage>>>>,
}

#[async_trait]
impl Session for FakeSession {
    async fn send_all(&mut self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        if self.failure == Failure::Send {
            return Err(TransportError::Rejected {
                command: "DATA",
                code: 451,
                message: "Try again later".to_string(),
            });
        }

        self.sent.lock().unwrap().push(messages.to_vec());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}
