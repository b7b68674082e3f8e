//! End-to-end bridge behavior against the in-memory broker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jetbridge::handler::{HandlerError, MessageHandler};
use jetbridge::{
    Client, ClientConfig, Error, ExceptionRoute, InboundMessage, JetStreamOptions, OutboundMessage,
    PublishOptions, PullOptions, PushOptions, handler_fn, sink_fn,
};
use jetbridge_memory::MemoryBroker;
use parking_lot::Mutex;

const SUBJECT: &str = "jetTestSubject";

fn setup() -> (MemoryBroker, Client, ExceptionRoute) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let broker = MemoryBroker::new();
    let route = ExceptionRoute::new();
    let client = broker.client(ClientConfig::default(), route.clone());
    (broker, client, route)
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn publish_ten(stream: &jetbridge::StreamBridge) {
    for i in 0..10 {
        stream
            .publish(OutboundMessage::new(SUBJECT, format!("data{i}")))
            .await
            .unwrap();
    }
}

struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _message: InboundMessage) -> Result<(), HandlerError> {
        Err("rejected on purpose".into())
    }
}

struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn handle(&self, _message: InboundMessage) -> Result<(), HandlerError> {
        panic!("boom");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_resolves_with_ack_metadata() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    for i in 0..10 {
        let ack = stream
            .publish(OutboundMessage::new(SUBJECT, format!("data{i}")))
            .await
            .unwrap();
        assert_eq!(ack.stream, SUBJECT);
        assert_eq!(ack.sequence, i + 1);
        assert!(!ack.duplicate);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_message_id_is_flagged() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();
    let options = PublishOptions {
        message_id: Some("msg-1".to_string()),
    };

    let first = stream
        .publish_with_options(OutboundMessage::new(SUBJECT, "data0"), options.clone())
        .await
        .unwrap();
    assert!(!first.duplicate);

    let second = stream
        .publish_with_options(OutboundMessage::new(SUBJECT, "data0"), options)
        .await
        .unwrap();
    assert!(second.duplicate);
    assert_eq!(second.sequence, first.sequence);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_behaves_like_publish() {
    let (broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let ack = stream
        .write(OutboundMessage::new(SUBJECT, "data0"))
        .await
        .unwrap();
    assert_eq!(ack.sequence, 1);

    let ack = stream
        .write_with_options(
            OutboundMessage::new(SUBJECT, "data1"),
            PublishOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(ack.sequence, 2);
    assert_eq!(broker.stream_len(SUBJECT), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_subscription_receives_messages_in_order() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = received.clone();
    stream
        .subscribe(
            SUBJECT,
            handler_fn(move |message| {
                sink.lock()
                    .push(String::from_utf8_lossy(message.payload()).into_owned());
            }),
            true,
            PushOptions::default(),
        )
        .await
        .unwrap();

    publish_ten(&stream).await;

    assert!(wait_until(|| received.lock().len() == 10).await);
    let expected: Vec<String> = (0..10).map(|i| format!("data{i}")).collect();
    assert_eq!(*received.lock(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_group_splits_messages_across_members() {
    let (broker, client_a, _route_a) = setup();
    let client_b = broker.client(ClientConfig::default(), ExceptionRoute::new());
    let stream_a = client_a.jet_stream(JetStreamOptions::default()).unwrap();
    let stream_b = client_b.jet_stream(JetStreamOptions::default()).unwrap();

    let seen_a = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen_b = Arc::new(Mutex::new(Vec::<String>::new()));
    for (stream, seen) in [(&stream_a, &seen_a), (&stream_b, &seen_b)] {
        let sink = Arc::clone(seen);
        stream
            .subscribe_queue(
                SUBJECT,
                "workers",
                handler_fn(move |message| {
                    sink.lock()
                        .push(String::from_utf8_lossy(message.payload()).into_owned());
                }),
                true,
                PushOptions::default(),
            )
            .await
            .unwrap();
    }

    publish_ten(&stream_a).await;

    assert!(wait_until(|| seen_a.lock().len() + seen_b.lock().len() == 10).await);
    let mut all: Vec<String> = seen_a.lock().clone();
    all.extend(seen_b.lock().iter().cloned());
    all.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("data{i}")).collect();
    expected.sort();
    assert_eq!(all, expected);
    // Round-robin across two members.
    assert_eq!(seen_a.lock().len(), 5);
    assert_eq!(seen_b.lock().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_subscription_on_a_subject_is_rejected() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    stream
        .subscribe(SUBJECT, handler_fn(|_| {}), true, PushOptions::default())
        .await
        .unwrap();

    let duplicate = stream
        .subscribe(SUBJECT, handler_fn(|_| {}), true, PushOptions::default())
        .await;
    assert!(matches!(
        duplicate,
        Err(Error::DuplicateSubscription(subject)) if subject == SUBJECT
    ));

    let pull_duplicate = stream.subscribe_pull(SUBJECT, PullOptions::default()).await;
    assert!(matches!(
        pull_duplicate,
        Err(Error::DuplicateSubscription(_))
    ));

    // Other subjects are unaffected.
    stream
        .subscribe("otherSubject", handler_fn(|_| {}), true, PushOptions::default())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_collects_a_full_batch() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    publish_ten(&stream).await;
    let subscription = stream
        .subscribe_pull(SUBJECT, PullOptions::default())
        .await
        .unwrap();

    let batch = subscription
        .fetch(10, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(batch.len(), 10);
    for (i, message) in batch.iter().enumerate() {
        assert_eq!(message.subject(), SUBJECT);
        assert_eq!(message.payload().as_ref(), format!("data{i}").as_bytes());
    }

    // The stream is drained; an empty batch is still a success.
    let empty = subscription
        .fetch(10, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn iterate_returns_a_single_pass_iterator() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    publish_ten(&stream).await;
    let subscription = stream
        .subscribe_pull(SUBJECT, PullOptions::default())
        .await
        .unwrap();

    let mut iter = subscription
        .iterate(10, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(iter.remaining(), 10);
    for i in 0..10 {
        let message = iter.next().unwrap();
        assert_eq!(message.payload().as_ref(), format!("data{i}").as_bytes());
    }
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_timeout_yields_a_partial_batch() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    for i in 0..4 {
        stream
            .publish(OutboundMessage::new(SUBJECT, format!("data{i}")))
            .await
            .unwrap();
    }
    let subscription = stream
        .subscribe_pull(SUBJECT, PullOptions::default())
        .await
        .unwrap();

    let started = Instant::now();
    let batch = subscription
        .fetch(10, Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(batch.len(), 4);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_short_fetches_accumulate_the_full_batch() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    publish_ten(&stream).await;
    let subscription = stream
        .subscribe_pull(SUBJECT, PullOptions::default())
        .await
        .unwrap();

    let mut collected = Vec::new();
    for _ in 0..100 {
        if collected.len() == 10 {
            break;
        }
        let batch = subscription
            .fetch(10, Duration::from_millis(10))
            .await
            .unwrap();
        collected.extend(batch);
    }
    assert_eq!(collected.len(), 10);
    for (i, message) in collected.iter().enumerate() {
        assert_eq!(message.payload().as_ref(), format!("data{i}").as_bytes());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_picks_up_messages_arriving_mid_window() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();
    let subscription = stream
        .subscribe_pull(SUBJECT, PullOptions::default())
        .await
        .unwrap();

    let publisher = stream.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        publisher
            .publish(OutboundMessage::new(SUBJECT, "late"))
            .await
            .unwrap();
    });

    let batch = subscription
        .fetch(1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload().as_ref(), b"late");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribe_stops_delivery_and_succeeds_once() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let received = Arc::new(Mutex::new(0_usize));
    let sink = received.clone();
    stream
        .subscribe(
            SUBJECT,
            handler_fn(move |_| *sink.lock() += 1),
            true,
            PushOptions::default(),
        )
        .await
        .unwrap();

    stream
        .publish(OutboundMessage::new(SUBJECT, "data0"))
        .await
        .unwrap();
    assert!(wait_until(|| *received.lock() == 1).await);

    stream.unsubscribe(SUBJECT).await.unwrap();
    assert!(matches!(
        stream.unsubscribe(SUBJECT).await,
        Err(Error::UnknownSubscription(_))
    ));
    assert!(matches!(
        stream.unsubscribe("neverSubscribed").await,
        Err(Error::UnknownSubscription(_))
    ));

    stream
        .publish(OutboundMessage::new(SUBJECT, "data1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*received.lock(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resubscribing_after_unsubscribe_works() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    stream
        .subscribe(SUBJECT, handler_fn(|_| {}), true, PushOptions::default())
        .await
        .unwrap();
    stream.unsubscribe(SUBJECT).await.unwrap();

    let received = Arc::new(Mutex::new(0_usize));
    let sink = received.clone();
    stream
        .subscribe(
            SUBJECT,
            handler_fn(move |_| *sink.lock() += 1),
            true,
            PushOptions::default(),
        )
        .await
        .unwrap();

    stream
        .publish(OutboundMessage::new(SUBJECT, "data0"))
        .await
        .unwrap();
    assert!(wait_until(|| *received.lock() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_failures_are_routed_and_delivery_continues() {
    let (_broker, client, route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let handler_errors = Arc::new(Mutex::new(0_usize));
    let counter = handler_errors.clone();
    route.attach(Arc::new(sink_fn(move |error| {
        if matches!(error, Error::Handler(_)) {
            *counter.lock() += 1;
        }
    })));

    stream
        .subscribe(SUBJECT, FailingHandler, true, PushOptions::default())
        .await
        .unwrap();
    publish_ten(&stream).await;

    assert!(wait_until(|| *handler_errors.lock() == 10).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_panics_are_contained() {
    let (_broker, client, route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let handler_errors = Arc::new(Mutex::new(0_usize));
    let counter = handler_errors.clone();
    route.attach(Arc::new(sink_fn(move |error| {
        if matches!(error, Error::Handler(_)) {
            *counter.lock() += 1;
        }
    })));

    stream
        .subscribe(SUBJECT, PanickingHandler, true, PushOptions::default())
        .await
        .unwrap();
    for i in 0..3 {
        stream
            .publish(OutboundMessage::new(SUBJECT, format!("data{i}")))
            .await
            .unwrap();
    }

    assert!(wait_until(|| *handler_errors.lock() == 3).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_failures_reject_futures_and_reach_sinks() {
    let (broker, client, route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let connection_errors = Arc::new(Mutex::new(0_usize));
    let counter = connection_errors.clone();
    route.attach(Arc::new(sink_fn(move |error| {
        if matches!(error, Error::Connection(_)) {
            *counter.lock() += 1;
        }
    })));

    let received = Arc::new(Mutex::new(0_usize));
    let counter = received.clone();
    stream
        .subscribe(
            SUBJECT,
            handler_fn(move |_| *counter.lock() += 1),
            true,
            PushOptions::default(),
        )
        .await
        .unwrap();

    broker.inject_publish_failures(5);
    let mut failed = 0;
    let mut succeeded = 0;
    for i in 0..10 {
        match stream
            .publish(OutboundMessage::new(SUBJECT, format!("data{i}")))
            .await
        {
            Ok(_) => succeeded += 1,
            Err(Error::Connection(_)) => failed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(failed, 5);
    assert_eq!(succeeded, 5);
    assert_eq!(*connection_errors.lock(), 5);
    assert_eq!(broker.stream_len(SUBJECT), 5);
    assert!(wait_until(|| *received.lock() == 5).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auto_ack_acknowledges_after_handoff() {
    let (broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    stream
        .subscribe(SUBJECT, handler_fn(|_| {}), true, PushOptions::default())
        .await
        .unwrap();
    publish_ten(&stream).await;

    assert!(wait_until(|| broker.acked_count() == 10).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn explicit_ack_counts_once_per_message() {
    let (broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    for i in 0..3 {
        stream
            .publish(OutboundMessage::new(SUBJECT, format!("data{i}")))
            .await
            .unwrap();
    }
    let subscription = stream
        .subscribe_pull(SUBJECT, PullOptions::default())
        .await
        .unwrap();
    let batch = subscription
        .fetch(3, Duration::from_secs(1))
        .await
        .unwrap();

    for message in &batch {
        message.ack().unwrap();
        message.ack().unwrap();
    }
    assert_eq!(broker.acked_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn headers_survive_the_round_trip() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    let received = Arc::new(Mutex::new(Vec::<InboundMessage>::new()));
    let sink = received.clone();
    stream
        .subscribe(
            SUBJECT,
            handler_fn(move |message| sink.lock().push(message)),
            true,
            PushOptions::default(),
        )
        .await
        .unwrap();

    let message = OutboundMessage::builder(SUBJECT)
        .payload("data0")
        .header("foo", "bar")
        .build();
    stream.publish(message).await.unwrap();
    stream
        .publish(OutboundMessage::new(SUBJECT, "data1"))
        .await
        .unwrap();

    assert!(wait_until(|| received.lock().len() == 2).await);
    let received = received.lock();
    assert!(received[0].has_headers());
    assert_eq!(
        received[0].headers().unwrap().get("foo").unwrap(),
        &["bar"]
    );
    assert!(!received[1].has_headers());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn configured_exception_handler_joins_the_route() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let broker = MemoryBroker::new();
    let route = ExceptionRoute::new();

    let configured = Arc::new(Mutex::new(0_usize));
    let counter = configured.clone();
    let config = ClientConfig::default()
        .with_exception_handler(Arc::new(sink_fn(move |_| *counter.lock() += 1)));
    let client = broker.client(config, route.clone());
    // Default logging sink plus the configured one.
    assert_eq!(route.sink_count(), 2);

    let attached = Arc::new(Mutex::new(0_usize));
    let counter = attached.clone();
    client.exception_handler(Arc::new(sink_fn(move |_| *counter.lock() += 1)));
    assert_eq!(route.sink_count(), 3);

    broker.inject_publish_failures(1);
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();
    let _ = stream.publish(OutboundMessage::new(SUBJECT, "data0")).await;

    assert_eq!(*configured.lock(), 1);
    assert_eq!(*attached.lock(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn end_is_idempotent_and_fails_later_calls() {
    let (_broker, client, _route) = setup();
    let stream = client.jet_stream(JetStreamOptions::default()).unwrap();

    stream
        .subscribe(SUBJECT, handler_fn(|_| {}), true, PushOptions::default())
        .await
        .unwrap();

    client.end().await.unwrap();
    client.end().await.unwrap();

    assert!(matches!(
        client.jet_stream(JetStreamOptions::default()),
        Err(Error::Closed)
    ));
    assert!(matches!(client.flush().await, Err(Error::Closed)));
    assert!(matches!(
        stream.publish(OutboundMessage::new(SUBJECT, "late")).await,
        Err(Error::Closed)
    ));
    assert!(matches!(
        stream.fetch(SUBJECT, 1, Duration::from_millis(10)).await,
        Err(Error::Closed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn periodic_flush_runs_until_end() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let broker = MemoryBroker::new();
    let config = ClientConfig {
        periodic_flush: true,
        periodic_flush_interval_ms: 20,
        ..ClientConfig::default()
    };
    let client = broker.client(config, ExceptionRoute::new());

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.end().await.unwrap();
}
