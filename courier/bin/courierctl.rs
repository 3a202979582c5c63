//! Command-line utility for courier queues
//!
//! - Declare a queue together with its dead-letter exchange and queue
//! - Validate an email payload with the same rules the consumer applies
//! - Publish a payload with broker confirmation

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier::CourierConfig;
use courier_broker::BrokerConnection;
use courier_common::{Email, logging};

/// Command-line utility for courier queues
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Manage courier queues", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the same search as courier)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for the broker connection
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Declare a queue with its dead-letter pair
    Declare {
        /// Queue to declare
        queue: String,

        /// Deliveries before a message is dead-lettered (defaults to the
        /// configured broker max_retries)
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Validate an email payload and publish it
    Publish {
        /// Queue to publish to
        queue: String,

        /// JSON email payload
        file: PathBuf,
    },
    /// Validate an email payload without publishing it
    Validate {
        /// JSON email payload
        file: PathBuf,
    },
}

fn read_email(file: &Path) -> anyhow::Result<Email> {
    let body = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    Email::decode(&body).with_context(|| format!("{} is not a valid email", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    if let Commands::Validate { file } = &cli.command {
        let email = read_email(file)?;
        println!(
            "{} is valid: {} recipients, {} attachments",
            file.display(),
            email.envelope_recipients().count(),
            email.attachments.len()
        );
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => CourierConfig::load(path)?,
        None => CourierConfig::discover()?,
    };

    let connection = BrokerConnection::new(config.broker.clone());
    let supervisor = tokio::spawn(Arc::clone(&connection).run());

    let result = async {
        tokio::time::timeout(
            Duration::from_secs(cli.connect_timeout),
            connection.wait_connected(),
        )
        .await
        .with_context(|| {
            format!(
                "Timed out connecting to the broker at {}:{}",
                config.broker.host, config.broker.port
            )
        })??;

        match cli.command {
            Commands::Declare { queue, max_retries } => {
                let max_retries = max_retries.unwrap_or(config.broker.max_retries);
                connection
                    .declare_queue_with_dead_letter(&queue, max_retries)
                    .await?;
                println!("Declared {queue} (max retries: {max_retries})");
            }
            Commands::Publish { queue, file } => {
                let email = read_email(&file)?;
                connection.publish(&queue, &email).await?;
                println!("Published {} to {queue}", file.display());
            }
            Commands::Validate { .. } => {}
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    connection.shutdown();
    let _ = supervisor.await;

    result
}
