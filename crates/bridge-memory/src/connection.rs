use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use jetbridge::broker::{BrokerConnection, BrokerConsumer, BrokerError};
use jetbridge::message::{Headers, PublishAck};
use jetbridge::options::{PullOptions, PushOptions};
use jetbridge::route::ExceptionRoute;
use jetbridge::{Client, ClientConfig};
use tracing::debug;

use crate::consumer::{MemoryPullConsumer, MemoryPushConsumer};
use crate::state::BrokerState;

/// An in-process broker. Connections created from the same broker share its
/// streams, so one test (or one process) can publish and consume through
/// independent clients.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState::new()),
        }
    }

    /// Opens a connection to this broker.
    #[must_use]
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            state: Arc::clone(&self.state),
        }
    }

    /// Opens a connection and wraps it in a [`Client`].
    #[must_use]
    pub fn client(&self, config: ClientConfig, route: ExceptionRoute) -> Client {
        Client::new(Arc::new(self.connection()), config, route)
    }

    /// Makes the next `count` publishes fail with an i/o error, for
    /// exercising failure paths.
    pub fn inject_publish_failures(&self, count: usize) {
        self.state.inject_publish_failures(count);
    }

    /// How many delivered messages have been acknowledged so far.
    #[must_use]
    pub fn acked_count(&self) -> u64 {
        self.state.acked.load(Ordering::SeqCst)
    }

    /// How many messages the stream for `subject` holds.
    #[must_use]
    pub fn stream_len(&self, subject: &str) -> usize {
        self.state.slot(subject).message_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("acked", &self.acked_count())
            .finish()
    }
}

/// One blocking connection onto a [`MemoryBroker`].
pub struct MemoryConnection {
    state: Arc<BrokerState>,
}

impl BrokerConnection for MemoryConnection {
    fn publish(
        &self,
        subject: &str,
        headers: Option<&Headers>,
        payload: Bytes,
    ) -> Result<PublishAck, BrokerError> {
        self.state.publish(subject, headers, payload)
    }

    fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        _options: &PushOptions,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        let (member_id, inbox) = self.state.add_member(subject, queue_group)?;
        debug!(subject, ?queue_group, member_id, "push consumer created");
        Ok(Box::new(MemoryPushConsumer::new(
            Arc::clone(&self.state),
            self.state.slot(subject),
            member_id,
            inbox,
        )))
    }

    fn pull_subscribe(
        &self,
        subject: &str,
        _options: &PullOptions,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        if self.state.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        debug!(subject, "pull consumer created");
        Ok(Box::new(MemoryPullConsumer::new(
            Arc::clone(&self.state),
            subject.to_string(),
            self.state.slot(subject),
        )))
    }

    fn flush(&self) -> Result<(), BrokerError> {
        if self.state.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.state.close();
        Ok(())
    }
}
