use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use futures::StreamExt;
use jetbridge::broker::{AckToken, BrokerConsumer, BrokerError};
use jetbridge::message::InboundMessage;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::warn;

use crate::convert::to_bridge_headers;

/// Acknowledgement for one JetStream delivery. The ack is enqueued on the
/// runtime; the caller never blocks on the broker's confirmation.
struct NatsAckToken {
    message: Mutex<Option<jetstream::Message>>,
    handle: Handle,
}

impl AckToken for NatsAckToken {
    fn ack(&self) -> Result<(), BrokerError> {
        // Idempotent: only the first ack reaches the broker.
        let Some(message) = self.message.lock().take() else {
            return Ok(());
        };
        self.handle.spawn(async move {
            if let Err(error) = message.ack().await {
                warn!(%error, "acknowledgement failed");
            }
        });
        Ok(())
    }
}

fn from_core(message: async_nats::Message) -> InboundMessage {
    InboundMessage::new(
        message.subject.to_string(),
        message.payload,
        message.headers.as_ref().map(to_bridge_headers),
    )
}

fn from_jetstream(message: jetstream::Message, handle: &Handle) -> InboundMessage {
    let inbound = InboundMessage::new(
        message.subject.to_string(),
        message.payload.clone(),
        message.headers.as_ref().map(to_bridge_headers),
    );
    inbound.with_ack(Arc::new(NatsAckToken {
        message: Mutex::new(Some(message)),
        handle: handle.clone(),
    }))
}

/// Push-mode consumer over a core subscription. The server fans out (or,
/// within a queue group, load-balances) deliveries; this side only drains
/// them.
pub(crate) struct NatsPushConsumer {
    subscriber: async_nats::Subscriber,
    handle: Handle,
}

impl NatsPushConsumer {
    pub(crate) const fn new(subscriber: async_nats::Subscriber, handle: Handle) -> Self {
        Self { subscriber, handle }
    }
}

impl BrokerConsumer for NatsPushConsumer {
    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BrokerError> {
        let handle = self.handle.clone();
        let next = handle.block_on(async {
            tokio::time::timeout(timeout, self.subscriber.next()).await
        });
        match next {
            Err(_) => Ok(None),
            // The subscription stream ends when the connection is gone.
            Ok(None) => Err(BrokerError::ConnectionClosed),
            Ok(Some(message)) => Ok(Some(from_core(message))),
        }
    }

    fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        let handle = self.handle.clone();
        handle
            .block_on(self.subscriber.unsubscribe())
            .map_err(|error| BrokerError::Unsubscribe(error.to_string()))
    }
}

/// Pull-mode consumer over a durable JetStream consumer. Each fetch asks
/// the server for a bounded batch; the expiry makes a short batch a normal
/// outcome rather than a failure.
pub(crate) struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
    context: jetstream::Context,
    stream_name: String,
    consumer_name: String,
    handle: Handle,
}

impl NatsPullConsumer {
    pub(crate) const fn new(
        consumer: jetstream::consumer::PullConsumer,
        context: jetstream::Context,
        stream_name: String,
        consumer_name: String,
        handle: Handle,
    ) -> Self {
        Self {
            consumer,
            context,
            stream_name,
            consumer_name,
            handle,
        }
    }
}

impl BrokerConsumer for NatsPullConsumer {
    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BrokerError> {
        Ok(self.fetch_batch(1, timeout)?.pop())
    }

    fn fetch_batch(
        &mut self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, BrokerError> {
        let handle = self.handle.clone();
        handle.block_on(async {
            let mut messages = self
                .consumer
                .fetch()
                .max_messages(batch_size)
                .expires(timeout)
                .messages()
                .await
                .map_err(|error| BrokerError::Io(error.to_string()))?;
            let mut batch = Vec::with_capacity(batch_size);
            while let Some(next) = messages.next().await {
                match next {
                    Ok(message) => batch.push(from_jetstream(message, &self.handle)),
                    Err(error) => return Err(BrokerError::Io(error.to_string())),
                }
            }
            Ok(batch)
        })
    }

    fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        let handle = self.handle.clone();
        handle
            .block_on(
                self.context
                    .delete_consumer_from_stream(&self.consumer_name, &self.stream_name),
            )
            .map(|_| ())
            .map_err(|error| BrokerError::Unsubscribe(error.to_string()))
    }
}
