//! Scripted SMTP server for transport tests.
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

/// What the server saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Command(String),
    Content(String),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub greeting: (u16, String),
    pub capabilities: Vec<String>,
    pub starttls: (u16, String),
    pub auth: (u16, String),
    pub mail_from: (u16, String),
    pub rcpt_to: (u16, String),
    pub data_end: (u16, String),
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: (220, "mock ESMTP ready".to_string()),
            capabilities: vec!["AUTH PLAIN".to_string(), "SIZE 10000000".to_string()],
            starttls: (454, "TLS not available".to_string()),
            auth: (235, "Authentication successful".to_string()),
            mail_from: (250, "OK".to_string()),
            rcpt_to: (250, "OK".to_string()),
            data_end: (250, "Queued".to_string()),
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
}

impl MockSmtpServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = handle(stream, script, log).await;
                });
            }
        });

        Self { addr, received }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }

    pub async fn commands(&self) -> Vec<String> {
        self.received()
            .await
            .into_iter()
            .filter_map(|r| match r {
                Received::Command(c) => Some(c),
                Received::Content(_) => None,
            })
            .collect()
    }

    pub async fn contents(&self) -> Vec<String> {
        self.received()
            .await
            .into_iter()
            .filter_map(|r| match r {
                Received::Content(c) => Some(c),
                Received::Command(_) => None,
            })
            .collect()
    }
}

fn reply((code, text): &(u16, String)) -> Vec<u8> {
    format!("{code} {text}\r\n").into_bytes()
}

async fn handle(
    mut stream: TcpStream,
    script: Script,
    log: Arc<Mutex<Vec<Received>>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    writer.write_all(&reply(&script.greeting)).await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end().to_string();
        log.lock().await.push(Received::Command(command.clone()));

        let verb = command
            .split([' ', ':'])
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        let response = match verb.as_str() {
            "EHLO" => {
                let mut lines = vec!["mock.example.com".to_string()];
                lines.extend(script.capabilities.iter().cloned());
                let last = lines.len() - 1;
                lines
                    .iter()
                    .enumerate()
                    .map(|(i, l)| format!("250{}{l}\r\n", if i == last { ' ' } else { '-' }))
                    .collect::<String>()
                    .into_bytes()
            }
            "STARTTLS" => reply(&script.starttls),
            "AUTH" => reply(&script.auth),
            "MAIL" => reply(&script.mail_from),
            "RCPT" => reply(&script.rcpt_to),
            "DATA" => {
                writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;

                let mut content = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(&line);
                }
                log.lock().await.push(Received::Content(content));
                reply(&script.data_end)
            }
            "QUIT" => {
                writer.write_all(b"221 Bye\r\n").await?;
                return Ok(());
            }
            _ => b"500 Unknown command\r\n".to_vec(),
        };

        writer.write_all(&response).await?;
    }
}
