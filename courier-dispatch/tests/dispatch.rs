mod support;

use std::{sync::Arc, time::Duration};

use courier_broker::Delivery;
use courier_cache::{AttachmentCache, CacheConfig, MemoryObjectStore};
use courier_dispatch::{
    BatchCollector, BatchConfig, DispatchStatus, EmailDispatcher, MemoryTemplates,
};
use courier_metrics::DispatchMetrics;
use courier_smtp::Mailbox;
use futures_util::{Stream, stream};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{
    Failure, FakeTransport, Outcome, Recorder, delivery, delivery_with, email,
    email_with_attachments,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};

fn dispatcher(store: &MemoryObjectStore, transport: &FakeTransport) -> EmailDispatcher {
    let cache = AttachmentCache::new(Arc::new(store.clone()), CacheConfig::default());
    EmailDispatcher::new(
        Mailbox::new("Courier", "noreply@example.com"),
        Arc::new(cache),
        Arc::new(transport.clone()),
    )
}

fn deliveries_from(rx: mpsc::UnboundedReceiver<Delivery>) -> impl Stream<Item = Delivery> + Unpin {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|delivery| (delivery, rx))
    }))
}

/// Collector feeding the dispatcher, one spawned dispatch task per batch.
fn pipeline(
    config: &BatchConfig,
    dispatcher: EmailDispatcher,
) -> (
    mpsc::UnboundedSender<Delivery>,
    mpsc::UnboundedReceiver<DispatchStatus>,
    JoinHandle<()>,
) {
    let (deliveries, rx) = mpsc::unbounded_channel();
    let (statuses_tx, statuses) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(dispatcher);

    let collector = BatchCollector::new(config);
    let task = tokio::spawn(collector.run(deliveries_from(rx), move |batch: Vec<Delivery>| {
        let dispatcher = Arc::clone(&dispatcher);
        let statuses = statuses_tx.clone();
        tokio::spawn(async move {
            let _ = statuses.send(dispatcher.dispatch(&batch).await);
        });
    }));

    (deliveries, statuses, task)
}

fn outcomes(recorders: &[Recorder]) -> Vec<Vec<Outcome>> {
    recorders.iter().map(Recorder::outcomes).collect()
}

#[tokio::test(start_paused = true)]
async fn partial_batch_is_sent_after_idle_timeout() {
    let transport = FakeTransport::new(Failure::None);
    let config = BatchConfig {
        max_batch_size: 5,
        flush_timeout_ms: 2000,
    };
    let (deliveries, mut statuses, task) =
        pipeline(&config, dispatcher(&MemoryObjectStore::new(), &transport));

    let mut recorders = Vec::new();
    for n in 0..3 {
        let (delivery, recorder) = delivery(email(&format!("user{n}@example.com")));
        deliveries.send(delivery).unwrap();
        recorders.push(recorder);
    }

    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert!(statuses.try_recv().is_err());
    assert_eq!(transport.opened(), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    let status = statuses.recv().await.unwrap();

    assert_eq!(
        status,
        DispatchStatus {
            sent: 3,
            failed: 0,
            errors: vec![],
        }
    );
    assert_eq!(outcomes(&recorders), vec![vec![Outcome::Ack]; 3]);
    assert_eq!(transport.opened(), 1);
    assert_eq!(transport.sessions()[0].len(), 3);

    drop(deliveries);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn full_batch_is_sent_without_waiting() {
    let transport = FakeTransport::new(Failure::None);
    let config = BatchConfig {
        max_batch_size: 5,
        flush_timeout_ms: 2000,
    };
    let (deliveries, mut statuses, task) =
        pipeline(&config, dispatcher(&MemoryObjectStore::new(), &transport));

    let started = Instant::now();
    for n in 0..5 {
        let (delivery, _) = delivery(email(&format!("user{n}@example.com")));
        deliveries.send(delivery).unwrap();
    }

    let status = statuses.recv().await.unwrap();

    assert!(started.elapsed() < config.flush_timeout());
    assert_eq!(status.sent, 5);
    assert_eq!(transport.sessions().len(), 1);

    drop(deliveries);
    task.await.unwrap();
}

#[tokio::test]
async fn missing_attachment_fails_only_its_email() {
    let store = MemoryObjectStore::new();
    store.put("terms.pdf", b"%PDF-1.4".to_vec());
    let transport = FakeTransport::new(Failure::None);
    let dispatcher = dispatcher(&store, &transport);

    let (first, first_recorder) = delivery(email_with_attachments("a@example.com", &["terms.pdf"]));
    let (broken, broken_recorder) =
        delivery(email_with_attachments("b@example.com", &["missing.pdf"]));
    let (last, last_recorder) = delivery(email("c@example.com"));

    let status = dispatcher.dispatch(&[first, broken, last]).await;

    assert_eq!(
        status,
        DispatchStatus {
            sent: 2,
            failed: 1,
            errors: vec![(
                "Attachment failed: Attachment missing.pdf not found".to_string(),
                1
            )],
        }
    );
    assert_eq!(
        outcomes(&[first_recorder, broken_recorder, last_recorder]),
        vec![vec![Outcome::Ack], vec![Outcome::Nack], vec![Outcome::Ack]]
    );

    let sessions = transport.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].len(), 2);
    let with_attachment = String::from_utf8_lossy(&sessions[0][0].data);
    assert!(with_attachment.contains("filename=\"terms.pdf\""));
}

#[tokio::test]
async fn session_failure_requeues_the_whole_batch() {
    let transport = FakeTransport::new(Failure::Open);
    let dispatcher = dispatcher(&MemoryObjectStore::new(), &transport);

    let (batch, recorders): (Vec<_>, Vec<_>) = (0..4)
        .map(|n| delivery(email(&format!("user{n}@example.com"))))
        .unzip();

    let status = dispatcher.dispatch(&batch).await;

    assert_eq!(
        status,
        DispatchStatus {
            sent: 0,
            failed: 4,
            errors: vec![(
                "Transport failed: Failed to connect to smtp.example.com:587: Connection refused"
                    .to_string(),
                4
            )],
        }
    );
    assert_eq!(outcomes(&recorders), vec![vec![Outcome::Nack]; 4]);
    assert_eq!(transport.opened(), 1);
}

#[tokio::test]
async fn bulk_send_failure_requeues_every_ready_email() {
    let transport = FakeTransport::new(Failure::Send);
    let dispatcher = dispatcher(&MemoryObjectStore::new(), &transport);

    let (good, good_recorder) = delivery(email("a@example.com"));
    let (bad, bad_recorder) = delivery(&b"not json"[..]);

    let status = dispatcher.dispatch(&[good, bad]).await;

    assert_eq!(status.sent, 0);
    assert_eq!(status.failed, 2);
    assert_eq!(status.errors.len(), 2);
    assert_eq!(
        outcomes(&[good_recorder, bad_recorder]),
        vec![vec![Outcome::Nack], vec![Outcome::Nack]]
    );
}

#[tokio::test]
async fn undecodable_deliveries_never_reach_the_transport() {
    let transport = FakeTransport::new(Failure::None);
    let dispatcher = dispatcher(&MemoryObjectStore::new(), &transport);

    let no_subject = json!({
        "receivers": [{ "name": "Ada", "email": "ada@example.com" }],
        "subject": "",
        "message": "Hi",
    })
    .to_string();
    let (malformed, malformed_recorder) = delivery(&b"{"[..]);
    let (invalid, invalid_recorder) = delivery(no_subject);

    let status = dispatcher.dispatch(&[malformed, invalid]).await;

    assert_eq!(status.sent, 0);
    assert_eq!(status.failed, 2);
    assert_eq!(status.errors[1], ("Decode failed: Subject is required".to_string(), 1));
    assert_eq!(
        outcomes(&[malformed_recorder, invalid_recorder]),
        vec![vec![Outcome::Nack], vec![Outcome::Nack]]
    );
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn recipient_names_cannot_inject_headers() {
    let transport = FakeTransport::new(Failure::None);
    let dispatcher = dispatcher(&MemoryObjectStore::new(), &transport);

    let injected = json!({
        "receivers": [{ "name": "Ada\r\nX-Injected: yes", "email": "ada@example.com" }],
        "subject": "Hi",
        "message": "Hello",
    })
    .to_string();
    let quoted = json!({
        "receivers": [{ "name": "Ada \"The Countess\"", "email": "ada@example.com" }],
        "subject": "Hi",
        "message": "Hello",
    })
    .to_string();
    let (injected, injected_recorder) = delivery(injected);
    let (quoted, quoted_recorder) = delivery(quoted);

    let status = dispatcher.dispatch(&[injected, quoted]).await;

    assert_eq!(
        status,
        DispatchStatus {
            sent: 1,
            failed: 1,
            errors: vec![(
                "Decode failed: Recipient ada@example.com has control characters in its name"
                    .to_string(),
                1
            )],
        }
    );
    assert_eq!(
        outcomes(&[injected_recorder, quoted_recorder]),
        vec![vec![Outcome::Nack], vec![Outcome::Ack]]
    );

    let sessions = transport.sessions();
    let data = String::from_utf8(sessions[0][0].data.clone()).unwrap();
    assert!(!data.contains("\r\nX-Injected"));
    assert!(data.contains("To: \"Ada \\\"The Countess\\\"\" <ada@example.com>\r\n"));
}

#[tokio::test]
async fn failed_acknowledgment_is_reported_but_not_requeued() {
    let transport = FakeTransport::new(Failure::None);
    let dispatcher = dispatcher(&MemoryObjectStore::new(), &transport);

    let (sent, sent_recorder) = delivery(email("a@example.com"));
    let (unacked, unacked_recorder) =
        delivery_with(email("b@example.com"), 0, Recorder::failing_ack());

    let status = dispatcher.dispatch(&[sent, unacked]).await;

    assert_eq!(
        status,
        DispatchStatus {
            sent: 1,
            failed: 1,
            errors: vec![("Acknowledge failed: Connection closed".to_string(), 1)],
        }
    );
    assert_eq!(
        outcomes(&[sent_recorder, unacked_recorder]),
        vec![vec![Outcome::Ack], vec![Outcome::Ack]]
    );
    assert_eq!(transport.sessions()[0].len(), 2);
}

#[tokio::test]
async fn templates_are_expanded_at_dispatch() {
    let transport = FakeTransport::new(Failure::None);
    let templates = MemoryTemplates::new().with("welcome", "Welcome aboard, {{ first_name }}!");
    let dispatcher =
        dispatcher(&MemoryObjectStore::new(), &transport).with_templates(Arc::new(templates));

    let templated = |data: serde_json::Value| {
        json!({
            "receivers": [{ "name": "Ada", "email": "ada@example.com" }],
            "subject": "Welcome",
            "template": { "name": "welcome", "data": data },
        })
        .to_string()
    };

    let (complete, complete_recorder) = delivery(templated(json!({ "first_name": "Ada" })));
    let (incomplete, incomplete_recorder) = delivery(templated(json!({})));

    let status = dispatcher.dispatch(&[complete, incomplete]).await;

    assert_eq!(status.sent, 1);
    assert_eq!(
        status.errors,
        vec![(
            "Template failed: Template \"welcome\" has no value for field \"first_name\""
                .to_string(),
            1
        )]
    );
    assert_eq!(
        outcomes(&[complete_recorder, incomplete_recorder]),
        vec![vec![Outcome::Ack], vec![Outcome::Nack]]
    );

    let message = String::from_utf8_lossy(&transport.sessions()[0][0].data).into_owned();
    assert!(message.contains("Welcome aboard, Ada!"));
}

#[tokio::test]
async fn unknown_template_is_a_materialize_failure() {
    let transport = FakeTransport::new(Failure::None);
    let dispatcher = dispatcher(&MemoryObjectStore::new(), &transport);

    let body = json!({
        "receivers": [{ "name": "Ada", "email": "ada@example.com" }],
        "subject": "Welcome",
        "template": { "name": "nope" },
    })
    .to_string();
    let (unknown, recorder) = delivery(body);

    let status = dispatcher.dispatch(&[unknown]).await;

    assert_eq!(
        status.errors,
        vec![("Template failed: Unknown template \"nope\"".to_string(), 1)]
    );
    assert_eq!(recorder.outcomes(), vec![Outcome::Nack]);
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn batch_metrics_are_recorded() {
    let store = MemoryObjectStore::new();
    store.put("terms.pdf", vec![1; 64]);
    let transport = FakeTransport::new(Failure::None);
    let metrics = Arc::new(DispatchMetrics::new());
    let dispatcher = dispatcher(&store, &transport)
        .with_recorder(metrics.clone())
        .with_max_retries(3);

    let (fresh, _) = delivery(email("a@example.com"));
    let (retried, _) = delivery_with(
        email_with_attachments("b@example.com", &["terms.pdf"]),
        1,
        Recorder::default(),
    );
    let (exhausted, _) = delivery_with(&b"garbage"[..], 3, Recorder::default());
    let received_bytes = (fresh.len() + retried.len() + exhausted.len()) as u64;

    dispatcher.dispatch(&[fresh, retried, exhausted]).await;

    let totals = metrics.totals();
    let sent_bytes = transport.sessions()[0]
        .iter()
        .map(|m| m.len() as u64)
        .sum::<u64>();

    assert_eq!(totals.received, 3);
    assert_eq!(totals.received_bytes, received_bytes);
    assert_eq!(totals.resent, 2);
    assert_eq!(totals.max_retries_reached, 1);
    assert_eq!(totals.sent, 2);
    assert_eq!(totals.sent_bytes, sent_bytes);
    assert_eq!(totals.attachments, 1);
    assert_eq!(totals.attachment_bytes, 64);
    assert_eq!(totals.sent_with_attachment, 1);
    assert_eq!(totals.failed, 1);
    assert_eq!(totals.batches, 1);
}

#[tokio::test]
async fn every_delivery_is_settled_exactly_once() {
    let store = MemoryObjectStore::new();
    store.put("a.txt", b"a".to_vec());
    let transport = FakeTransport::new(Failure::None);
    let dispatcher = dispatcher(&store, &transport);

    let bodies: Vec<Vec<u8>> = vec![
        email("a@example.com"),
        b"[]".to_vec(),
        email_with_attachments("b@example.com", &["a.txt"]),
        email_with_attachments("c@example.com", &["a.txt", "b.txt"]),
        email("d@example.com"),
    ];
    let (batch, recorders): (Vec<_>, Vec<_>) = bodies.into_iter().map(delivery).unzip();

    let status = dispatcher.dispatch(&batch).await;

    assert_eq!(status.total(), batch.len());
    assert_eq!(status.sent, 3);
    for outcome in outcomes(&recorders) {
        assert_eq!(outcome.len(), 1);
    }
}
