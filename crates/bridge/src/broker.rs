use std::time::Duration;

use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::message::{Headers, InboundMessage, PublishAck};
use crate::options::{PullOptions, PushOptions};

/// Errors produced by a broker backend.
#[derive(Debug, ThisError)]
pub enum BrokerError {
    /// The connection is closed (locally or because the broker went away).
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-level failure.
    #[error("broker i/o error: {0}")]
    Io(String),

    /// The broker rejected a subscription request.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    /// The broker rejected an unsubscribe request.
    #[error("failed to unsubscribe: {0}")]
    Unsubscribe(String),

    /// Acknowledging a message failed.
    #[error("failed to acknowledge message: {0}")]
    Ack(String),
}

/// Acknowledgement capability carried by explicit-ack messages.
///
/// Implementations must not block: acks are enqueued (or handed to the
/// runtime) and confirmed out of band.
pub trait AckToken: Send + Sync {
    /// Acknowledges the message to the broker.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement cannot be enqueued.
    fn ack(&self) -> Result<(), BrokerError>;
}

/// A broker-side consumer created by a subscribe call.
///
/// All methods block the calling thread; the bridge only invokes them from
/// worker threads.
pub trait BrokerConsumer: Send {
    /// Waits up to `timeout` for the next message. `Ok(None)` means the
    /// window elapsed without a message, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionClosed`] once the connection is gone
    /// and no buffered messages remain.
    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BrokerError>;

    /// Collects up to `batch_size` messages, waiting at most `timeout`.
    /// A partial (or empty) batch is a success, never a failure.
    ///
    /// The default implementation polls [`Self::next_timeout`] until the
    /// batch fills or the time budget runs out; backends with a native
    /// batch-fetch call should override it.
    ///
    /// # Errors
    ///
    /// Fails only when the underlying connection itself failed.
    fn fetch_batch(
        &mut self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, BrokerError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut collected = Vec::with_capacity(batch_size);
        while collected.len() < batch_size {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            match self.next_timeout(deadline - now)? {
                Some(message) => collected.push(message),
                None => break,
            }
        }
        Ok(collected)
    }

    /// Stops broker-side delivery for this consumer.
    ///
    /// # Errors
    ///
    /// Returns an error when the broker rejects the request; local teardown
    /// must still have happened.
    fn unsubscribe(&mut self) -> Result<(), BrokerError>;
}

/// The wrapped broker client: a pre-existing connection with a synchronous
/// request/response surface.
///
/// The bridge never calls these methods on the async runtime; every call is
/// offloaded to a worker thread and its result marshalled back as a future
/// completion.
pub trait BrokerConnection: Send + Sync + 'static {
    /// Publishes `payload` to `subject` and blocks until the broker
    /// acknowledges it.
    ///
    /// # Errors
    ///
    /// Fails when the connection is down, the publish times out, or the
    /// broker rejects the message.
    fn publish(
        &self,
        subject: &str,
        headers: Option<&Headers>,
        payload: Bytes,
    ) -> Result<PublishAck, BrokerError>;

    /// Creates a push-mode consumer, optionally as a member of a queue
    /// group. Load balancing across group members is the broker's job.
    ///
    /// # Errors
    ///
    /// Fails when the connection is down or the broker rejects the request.
    fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: &PushOptions,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError>;

    /// Creates a pull-mode consumer. No broker-side delivery starts until
    /// the consumer is asked for messages.
    ///
    /// # Errors
    ///
    /// Fails when the connection is down or the broker rejects the request.
    fn pull_subscribe(
        &self,
        subject: &str,
        options: &PullOptions,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError>;

    /// Flushes buffered outbound data to the broker.
    ///
    /// # Errors
    ///
    /// Fails when the connection is down.
    fn flush(&self) -> Result<(), BrokerError>;

    /// Closes the connection, releasing all broker-side subscriptions.
    ///
    /// # Errors
    ///
    /// Fails when shutdown is already in progress; local release must still
    /// have happened.
    fn close(&self) -> Result<(), BrokerError>;
}
