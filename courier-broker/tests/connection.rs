use std::{collections::BTreeMap, sync::Arc, time::Duration};

use courier_broker::{BrokerConfig, BrokerConnection, BrokerError, ConnectionState};
use pretty_assertions::assert_eq;
use tokio::time::Instant;

fn unreachable_config() -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn publish_while_disconnected_exhausts_attempts() {
    let connection = BrokerConnection::new(unreachable_config());
    let started = Instant::now();

    let result = connection.publish("emails", &"hello").await;

    assert_eq!(
        result,
        Err(BrokerError::MaxRetries(vec![BrokerError::ConnectionClosed; 5]))
    );
    // 1s + 2s + 4s + 8s between the five attempts
    assert!(started.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn publish_serialization_failure_is_not_retried() {
    let connection = BrokerConnection::new(unreachable_config());
    let started = Instant::now();

    let mut payload = BTreeMap::new();
    payload.insert((1, 2), "tuple keys cannot be JSON object keys");

    let result = connection.publish("emails", &payload).await;

    assert!(matches!(result, Err(BrokerError::Serialization(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn declare_while_disconnected_exhausts_attempts() {
    let connection = BrokerConnection::new(unreachable_config());

    let result = connection.declare_queue_with_dead_letter("emails", 3).await;

    assert_eq!(
        result,
        Err(BrokerError::MaxRetries(vec![BrokerError::ConnectionClosed; 3]))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_publish_retries() {
    let connection = BrokerConnection::new(unreachable_config());

    let publisher = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move { connection.publish("emails", &"hello").await })
    };

    tokio::time::sleep(Duration::from_millis(1500)).await;
    connection.shutdown();

    assert_eq!(publisher.await.unwrap(), Err(BrokerError::Shutdown));
    assert_eq!(connection.state(), ConnectionState::Closing);
}

#[tokio::test]
async fn consume_requires_a_connection() {
    let connection = BrokerConnection::new(unreachable_config());

    let result = connection.consume("emails", 10).await;

    assert!(matches!(result, Err(BrokerError::ConnectionClosed)));
}

#[tokio::test]
async fn failed_dial_reports_disconnected_during_backoff() {
    let connection = BrokerConnection::new(BrokerConfig {
        reconnect_base_delay_ms: 10_000,
        ..unreachable_config()
    });
    let mut states = connection.subscribe_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    let supervisor = tokio::spawn(Arc::clone(&connection).run());

    // The first published state is Connecting; seeing Disconnected after a
    // change means the dial failed and the supervisor is backing off.
    loop {
        states.changed().await.unwrap();
        if *states.borrow_and_update() == ConnectionState::Disconnected {
            break;
        }
    }
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    connection.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Ok(()));
    assert_eq!(connection.state(), ConnectionState::Closing);
}

#[tokio::test]
async fn supervisor_keeps_dialing_until_shutdown() {
    let connection = BrokerConnection::new(BrokerConfig {
        reconnect_base_delay_ms: 10,
        ..unreachable_config()
    });
    let mut states = connection.subscribe_state();

    let supervisor = tokio::spawn(Arc::clone(&connection).run());

    states.changed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!connection.state().is_connected());

    connection.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Ok(()));
    assert_eq!(connection.state(), ConnectionState::Closing);
    assert_eq!(connection.wait_connected().await, Err(BrokerError::Shutdown));
}
