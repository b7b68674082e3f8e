//! Integration tests against a local NATS server with JetStream enabled.
//!
//! Run with `cargo test -- --ignored` after starting `nats-server -js`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jetbridge::{
    ClientConfig, ExceptionRoute, JetStreamOptions, OutboundMessage, PullOptions, PushOptions,
    handler_fn,
};
use jetbridge_nats::connect;
use parking_lot::Mutex;
use serial_test::serial;
use uuid::Uuid;

fn test_subject() -> String {
    format!("jetTestSubject.{}", Uuid::new_v4().simple())
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "requires a local nats server with jetstream"]
async fn publish_then_fetch_roundtrip() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let subject = test_subject();
    let client = connect(ClientConfig::default(), ExceptionRoute::new())
        .await
        .unwrap();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let subscription = stream
        .subscribe_pull(subject.clone(), PullOptions::default())
        .await
        .unwrap();
    for i in 0..10 {
        let ack = stream
            .publish(OutboundMessage::new(subject.clone(), format!("data{i}")))
            .await
            .unwrap();
        assert!(!ack.duplicate);
    }

    let batch = subscription
        .fetch(10, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(batch.len(), 10);
    for (i, message) in batch.iter().enumerate() {
        assert_eq!(message.payload().as_ref(), format!("data{i}").as_bytes());
        message.ack().unwrap();
    }

    client.end().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "requires a local nats server with jetstream"]
async fn push_subscription_delivers_in_order() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let subject = test_subject();
    let client = connect(ClientConfig::default(), ExceptionRoute::new())
        .await
        .unwrap();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    // Acked publishes need a stream covering the subject; a second client's
    // pull subscription creates it without occupying the subject locally.
    let helper = connect(ClientConfig::default(), ExceptionRoute::new())
        .await
        .unwrap();
    let helper_stream = helper.jet_stream(JetStreamOptions::default()).unwrap();
    helper_stream
        .subscribe_pull(subject.clone(), PullOptions::default())
        .await
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = received.clone();
    stream
        .subscribe(
            subject.clone(),
            handler_fn(move |message| {
                sink.lock()
                    .push(String::from_utf8_lossy(message.payload()).into_owned());
            }),
            true,
            PushOptions::default(),
        )
        .await
        .unwrap();

    for i in 0..10 {
        stream
            .publish_payload(subject.clone(), format!("data{i}"))
            .await
            .unwrap();
    }

    assert!(wait_until(|| received.lock().len() == 10).await);
    let expected: Vec<String> = (0..10).map(|i| format!("data{i}")).collect();
    assert_eq!(*received.lock(), expected);

    stream.unsubscribe(&subject).await.unwrap();
    client.end().await.unwrap();
    helper.end().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "requires a local nats server with jetstream"]
async fn headers_survive_the_round_trip() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let subject = test_subject();
    let client = connect(ClientConfig::default(), ExceptionRoute::new())
        .await
        .unwrap();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let subscription = stream
        .subscribe_pull(subject.clone(), PullOptions::default())
        .await
        .unwrap();
    let message = OutboundMessage::builder(subject)
        .payload("data0")
        .header("foo", "bar")
        .build();
    stream.publish(message).await.unwrap();

    let batch = subscription
        .fetch(1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(
        batch[0].headers().unwrap().get("foo").unwrap(),
        &["bar"]
    );

    client.end().await.unwrap();
}
