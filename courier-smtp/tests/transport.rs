mod support;

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_smtp::{
    Mailbox, MessageBuilder, OutboundMessage, SmtpConfig, SmtpTransport, Transport, TransportError,
};
use pretty_assertions::assert_eq;
use support::{MockSmtpServer, Script};

fn config(port: u16) -> SmtpConfig {
    SmtpConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: Some("courier".to_string()),
        password: Some("secret".to_string()),
        hello_name: Some("courier.test".to_string()),
        require_tls: false,
        ..Default::default()
    }
}

fn message(to: &str, body: &str) -> OutboundMessage {
    MessageBuilder::new(Mailbox::new("Courier", "noreply@example.com"))
        .to(Mailbox::address_only(to))
        .subject("Hello")
        .body(body)
        .build()
        .unwrap()
}

#[tokio::test]
async fn sends_a_batch_in_one_session() {
    let server = MockSmtpServer::start(Script::default()).await;
    let transport = SmtpTransport::new(config(server.port()));

    let mut session = transport.open().await.unwrap();
    session
        .send_all(&[
            message("ada@example.com", "first"),
            message("grace@example.com", ".leading dot"),
        ])
        .await
        .unwrap();
    session.close().await.unwrap();

    let token = STANDARD.encode("\0courier\0secret");
    assert_eq!(
        server.commands().await,
        vec![
            "EHLO courier.test".to_string(),
            format!("AUTH PLAIN {token}"),
            "MAIL FROM:<noreply@example.com>".to_string(),
            "RCPT TO:<ada@example.com>".to_string(),
            "DATA".to_string(),
            "MAIL FROM:<noreply@example.com>".to_string(),
            "RCPT TO:<grace@example.com>".to_string(),
            "DATA".to_string(),
            "QUIT".to_string(),
        ]
    );

    let contents = server.contents().await;
    assert_eq!(contents.len(), 2);
    assert!(contents[0].ends_with("\r\n\r\nfirst\r\n"));
    assert!(contents[1].contains("\r\n..leading dot\r\n"));
}

#[tokio::test]
async fn missing_starttls_fails_when_tls_is_required() {
    let server = MockSmtpServer::start(Script::default()).await;
    let transport = SmtpTransport::new(SmtpConfig {
        require_tls: true,
        ..config(server.port())
    });

    let error = transport.open().await.err().unwrap();

    assert!(matches!(error, TransportError::TlsRequired(_)));
    assert!(!server.commands().await.iter().any(|c| c.starts_with("AUTH")));
}

#[tokio::test]
async fn refused_starttls_is_fatal() {
    let server = MockSmtpServer::start(Script {
        capabilities: vec!["STARTTLS".to_string(), "AUTH PLAIN".to_string()],
        ..Script::default()
    })
    .await;
    let transport = SmtpTransport::new(config(server.port()));

    let error = transport.open().await.err().unwrap();

    assert!(matches!(error, TransportError::TlsRequired(_)));
    assert_eq!(server.commands().await.last().unwrap(), "STARTTLS");
}

#[tokio::test]
async fn rejected_credentials() {
    let server = MockSmtpServer::start(Script {
        auth: (535, "Authentication credentials invalid".to_string()),
        ..Script::default()
    })
    .await;
    let transport = SmtpTransport::new(config(server.port()));

    let error = transport.open().await.err().unwrap();

    assert!(matches!(error, TransportError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn rejected_recipient_fails_the_call() {
    let server = MockSmtpServer::start(Script {
        rcpt_to: (550, "No such user".to_string()),
        ..Script::default()
    })
    .await;
    let transport = SmtpTransport::new(config(server.port()));

    let mut session = transport.open().await.unwrap();
    let error = session
        .send_all(&[message("ghost@example.com", "boo"), message("ada@example.com", "hi")])
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        TransportError::Rejected { command: "RCPT TO", code: 550, .. }
    ));
    assert!(!error.is_transient());
    assert!(server.contents().await.is_empty());
}

#[tokio::test]
async fn unfriendly_greeting_is_a_connect_error() {
    let server = MockSmtpServer::start(Script {
        greeting: (554, "No service".to_string()),
        ..Script::default()
    })
    .await;
    let transport = SmtpTransport::new(config(server.port()));

    assert!(matches!(
        transport.open().await,
        Err(TransportError::Connect { .. })
    ));
}

#[tokio::test]
async fn unreachable_server_is_a_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = SmtpTransport::new(config(port));

    let error = transport.open().await.err().unwrap();
    assert!(matches!(error, TransportError::Connect { .. }));
    assert!(error.is_transient());
}
