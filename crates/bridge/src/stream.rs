use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::broker::BrokerConnection;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::handler::MessageHandler;
use crate::message::{Headers, InboundMessage, MessageIter, OutboundMessage, PublishAck};
use crate::options::{PublishOptions, PullOptions, PushOptions};
use crate::publish::PublishBridge;
use crate::registry::{SubscriptionEntry, SubscriptionRegistry};
use crate::route::ExceptionRoute;

/// A handle to an active push subscription.
#[derive(Clone, Debug)]
pub struct Subscription {
    subject: String,
    queue_group: Option<String>,
}

impl Subscription {
    /// The subscribed subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The queue group this subscription joined, if any.
    #[must_use]
    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }
}

/// A handle to a pull subscription. Retrieval is driven explicitly through
/// [`SubscriptionReadStream::fetch`] and [`SubscriptionReadStream::iterate`];
/// no background delivery loop runs.
#[derive(Clone, Debug)]
pub struct SubscriptionReadStream {
    subject: String,
    stream: StreamBridge,
}

impl SubscriptionReadStream {
    /// The subscribed subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Collects up to `batch_size` messages within `timeout`.
    ///
    /// # Errors
    ///
    /// Fails only when the subscription is gone or the connection failed;
    /// a partial or empty batch is a success.
    pub async fn fetch(
        &self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, Error> {
        self.stream.fetch(&self.subject, batch_size, timeout).await
    }

    /// Like [`Self::fetch`], returning a single-pass iterator.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::fetch`].
    pub async fn iterate(
        &self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<MessageIter, Error> {
        self.stream.iterate(&self.subject, batch_size, timeout).await
    }
}

/// The client-facing stream façade.
///
/// Owns no state beyond delegation: it translates caller options into calls
/// on the registry, dispatcher, and publish bridge. Cloning is cheap and
/// clones share the same registry and connection.
#[derive(Clone)]
pub struct StreamBridge {
    connection: Arc<dyn BrokerConnection>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    publisher: PublishBridge,
    route: ExceptionRoute,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBridge")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl StreamBridge {
    pub(crate) fn new(
        connection: Arc<dyn BrokerConnection>,
        registry: Arc<SubscriptionRegistry>,
        route: ExceptionRoute,
        closed: Arc<AtomicBool>,
        publish_timeout: Option<Duration>,
    ) -> Self {
        let dispatcher = Dispatcher::new(route.clone());
        let publisher = PublishBridge::new(
            Arc::clone(&connection),
            dispatcher.clone(),
            route.clone(),
            publish_timeout,
        );
        Self {
            connection,
            registry,
            dispatcher,
            publisher,
            route,
            closed,
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Publishes `message` and resolves with the broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Fails when the connection is down, the publish times out, or the
    /// broker rejects the message; the failure is also broadcast through
    /// the exception route.
    pub async fn publish(&self, message: OutboundMessage) -> Result<PublishAck, Error> {
        self.ensure_open()?;
        self.publisher.send(message, None).await
    }

    /// [`Self::publish`] with per-publish options.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::publish`].
    pub async fn publish_with_options(
        &self,
        message: OutboundMessage,
        options: PublishOptions,
    ) -> Result<PublishAck, Error> {
        self.ensure_open()?;
        self.publisher.send(message, Some(options)).await
    }

    /// Publishes a bare payload to `subject`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::publish`].
    pub async fn publish_payload(
        &self,
        subject: impl Into<String> + Send,
        payload: impl Into<Bytes> + Send,
    ) -> Result<PublishAck, Error> {
        self.publish(OutboundMessage::new(subject, payload)).await
    }

    /// Publishes a payload with headers to `subject`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::publish`].
    pub async fn publish_with_headers(
        &self,
        subject: impl Into<String> + Send,
        headers: Headers,
        payload: impl Into<Bytes> + Send,
    ) -> Result<PublishAck, Error> {
        let mut message = OutboundMessage::new(subject, payload);
        message.headers = Some(headers);
        self.publish(message).await
    }

    /// Lower-level send. Kept as a distinct entry point for callers that
    /// want a write without implying stream-specific options; observable
    /// behavior is identical to [`Self::publish`].
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::publish`].
    pub async fn write(&self, message: OutboundMessage) -> Result<PublishAck, Error> {
        self.publish(message).await
    }

    /// [`Self::write`] with per-publish options.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::publish`].
    pub async fn write_with_options(
        &self,
        message: OutboundMessage,
        options: PublishOptions,
    ) -> Result<PublishAck, Error> {
        self.publish_with_options(message, options).await
    }

    /// Creates a push subscription on `subject`.
    ///
    /// Each inbound message is delivered to `handler` on the runtime, in
    /// arrival order, never concurrently with itself. With `auto_ack` the
    /// bridge acknowledges each message right after handoff; otherwise
    /// acking is the handler's job via the message's ack capability.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateSubscription`] when `subject` already
    /// has an active subscription, or with a connection error when the
    /// broker rejects the consumer.
    pub async fn subscribe<H>(
        &self,
        subject: impl Into<String> + Send,
        handler: H,
        auto_ack: bool,
        options: PushOptions,
    ) -> Result<Subscription, Error>
    where
        H: MessageHandler,
    {
        self.subscribe_inner(subject.into(), None, Arc::new(handler), auto_ack, options)
            .await
    }

    /// Creates a push subscription as a member of `queue_group`. The broker
    /// load-balances across group members; the per-member contract is
    /// identical to [`Self::subscribe`].
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::subscribe`].
    pub async fn subscribe_queue<H>(
        &self,
        subject: impl Into<String> + Send,
        queue_group: impl Into<String> + Send,
        handler: H,
        auto_ack: bool,
        options: PushOptions,
    ) -> Result<Subscription, Error>
    where
        H: MessageHandler,
    {
        self.subscribe_inner(
            subject.into(),
            Some(queue_group.into()),
            Arc::new(handler),
            auto_ack,
            options,
        )
        .await
    }

    async fn subscribe_inner(
        &self,
        subject: String,
        queue_group: Option<String>,
        handler: Arc<dyn MessageHandler>,
        auto_ack: bool,
        options: PushOptions,
    ) -> Result<Subscription, Error> {
        self.ensure_open()?;

        // Reserve the subject first so concurrent subscribes cannot race
        // past the single-subscription-per-subject check.
        let (stop_tx, stop_rx) = watch::channel(());
        self.registry
            .try_insert(&subject, SubscriptionEntry::push(queue_group.clone(), stop_tx))?;

        let connection = Arc::clone(&self.connection);
        let call_subject = subject.clone();
        let call_group = queue_group.clone();
        let created = self
            .dispatcher
            .offload(move || connection.subscribe(&call_subject, call_group.as_deref(), &options))
            .await;

        match created {
            Ok(consumer) => {
                debug!(subject = %subject, queue_group = ?queue_group, "push subscription started");
                self.dispatcher.start_push_delivery(
                    subject.clone(),
                    consumer,
                    handler,
                    auto_ack,
                    stop_rx,
                );
                Ok(Subscription {
                    subject,
                    queue_group,
                })
            }
            Err(error) => {
                let _ = self.registry.remove(&subject);
                self.route.broadcast(&error);
                Err(error)
            }
        }
    }

    /// Creates a pull subscription on `subject`. No background delivery
    /// starts; retrieval is driven by [`Self::fetch`] and [`Self::iterate`].
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::subscribe`].
    pub async fn subscribe_pull(
        &self,
        subject: impl Into<String> + Send,
        options: PullOptions,
    ) -> Result<SubscriptionReadStream, Error> {
        self.ensure_open()?;
        let subject = subject.into();

        let (stop_tx, _stop_rx) = watch::channel(());
        self.registry
            .try_insert(&subject, SubscriptionEntry::pull(stop_tx))?;

        let connection = Arc::clone(&self.connection);
        let call_subject = subject.clone();
        let created = self
            .dispatcher
            .offload(move || connection.pull_subscribe(&call_subject, &options))
            .await;

        match created {
            Ok(consumer) => {
                let shared = Arc::new(Mutex::new(consumer));
                if !self.registry.set_pull_consumer(&subject, shared) {
                    // Unsubscribed while the consumer was being created.
                    return Err(Error::UnknownSubscription(subject));
                }
                debug!(subject = %subject, "pull subscription started");
                Ok(SubscriptionReadStream {
                    subject,
                    stream: self.clone(),
                })
            }
            Err(error) => {
                let _ = self.registry.remove(&subject);
                self.route.broadcast(&error);
                Err(error)
            }
        }
    }

    /// Collects up to `batch_size` messages from the pull subscription on
    /// `subject`, waiting at most `timeout`. The time budget bounds the
    /// collection window only: an empty or partial batch is a success.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownSubscription`] when `subject` has no
    /// pull-mode subscription, or with a connection error when the
    /// underlying connection failed.
    pub async fn fetch(
        &self,
        subject: &str,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, Error> {
        self.ensure_open()?;
        let consumer = self.registry.pull_consumer(subject)?;
        let result = self
            .dispatcher
            .offload(move || consumer.lock().fetch_batch(batch_size, timeout))
            .await;
        if let Err(error) = &result {
            self.route.broadcast(error);
        }
        result
    }

    /// Like [`Self::fetch`], returning a forward-only, single-pass iterator
    /// over the collected batch. Consuming the iterator after the future
    /// resolves never blocks.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::fetch`].
    pub async fn iterate(
        &self,
        subject: &str,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<MessageIter, Error> {
        let batch = self.fetch(subject, batch_size, timeout).await?;
        Ok(MessageIter::from(batch))
    }

    /// Removes the subscription on `subject` and stops further delivery.
    /// Messages already handed to the dispatcher may still reach the
    /// handler; unsubscribe is cooperative, not a hard interrupt.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownSubscription`] when no active
    /// subscription exists; only the first unsubscribe for a subject
    /// succeeds.
    pub async fn unsubscribe(&self, subject: &str) -> Result<(), Error> {
        let entry = self.registry.remove(subject)?;
        let _ = entry.stop.send(());
        if let Some(consumer) = entry.consumer {
            self.dispatcher
                .offload(move || consumer.lock().unsubscribe())
                .await?;
        }
        debug!(subject = %subject, "unsubscribed");
        Ok(())
    }
}
