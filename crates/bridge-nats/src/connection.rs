use std::sync::Arc;

use async_nats::jetstream;
use bytes::Bytes;
use jetbridge::broker::{BrokerConnection, BrokerConsumer, BrokerError};
use jetbridge::message::{Headers, PublishAck};
use jetbridge::options::{PullOptions, PushOptions};
use jetbridge::route::ExceptionRoute;
use jetbridge::{Client, ClientConfig, Error};
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::consumer::{NatsPullConsumer, NatsPushConsumer};
use crate::convert::to_nats_headers;
use crate::error::ConnectError;

/// Connects to the configured NATS servers and wraps the connection in a
/// [`Client`].
///
/// Connection-level events (disconnects, server errors) are broadcast on
/// `route`, the same chain the returned client routes its own failures
/// through. Reconnection is off unless the configuration enables it.
///
/// Must be called on a multi-threaded tokio runtime: the blocking consumer
/// surface re-enters the runtime from worker threads.
///
/// # Errors
///
/// Fails when no server is reachable within the configured timeout, or
/// when called from outside a tokio runtime.
pub async fn connect(config: ClientConfig, route: ExceptionRoute) -> Result<Client, ConnectError> {
    let handle = Handle::try_current()?;

    let event_route = route.clone();
    let mut options = async_nats::ConnectOptions::new()
        .connection_timeout(config.connection_timeout())
        .event_callback(move |event| {
            let route = event_route.clone();
            async move {
                match event {
                    async_nats::Event::Disconnected => {
                        route.broadcast(&Error::Connection("connection lost".to_string()));
                    }
                    async_nats::Event::Closed => {
                        route.broadcast(&Error::Connection("connection closed".to_string()));
                    }
                    async_nats::Event::ServerError(error) => {
                        route.broadcast(&Error::Connection(error.to_string()));
                    }
                    async_nats::Event::ClientError(error) => {
                        route.broadcast(&Error::Connection(error.to_string()));
                    }
                    event => debug!(%event, "connection event"),
                }
            }
        });
    if !config.auto_reconnect {
        options = options.max_reconnects(0);
    }
    if let Some(name) = &config.name {
        options = options.name(name);
    }

    let client = options.connect(config.urls.join(",")).await?;
    let context = jetstream::new(client.clone());
    info!(url = %config.primary_url(), "connected to nats");

    let connection = NatsConnection {
        client,
        context,
        handle,
    };
    Ok(Client::new(Arc::new(connection), config, route))
}

/// Blocking facade over one `async-nats` connection.
///
/// Every method re-enters the captured runtime handle with `block_on`; the
/// bridge guarantees these methods only run on worker threads, never on
/// the runtime itself.
pub struct NatsConnection {
    client: async_nats::Client,
    context: jetstream::Context,
    handle: Handle,
}

fn stream_name_for(subject: &str) -> String {
    subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl BrokerConnection for NatsConnection {
    fn publish(
        &self,
        subject: &str,
        headers: Option<&Headers>,
        payload: Bytes,
    ) -> Result<PublishAck, BrokerError> {
        let subject = subject.to_string();
        self.handle.block_on(async {
            let publish = match headers {
                Some(headers) => {
                    self.context
                        .publish_with_headers(subject, to_nats_headers(headers), payload)
                        .await
                }
                None => self.context.publish(subject, payload).await,
            };
            let ack = publish
                .map_err(|error| BrokerError::Io(error.to_string()))?
                .await
                .map_err(|error| BrokerError::Io(error.to_string()))?;
            Ok(PublishAck {
                stream: ack.stream,
                sequence: ack.sequence,
                duplicate: ack.duplicate,
            })
        })
    }

    fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        _options: &PushOptions,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        let subject = subject.to_string();
        let subscriber = self.handle.block_on(async {
            match queue_group {
                Some(group) => self.client.queue_subscribe(subject, group.to_string()).await,
                None => self.client.subscribe(subject).await,
            }
        });
        let subscriber =
            subscriber.map_err(|error| BrokerError::Subscribe(error.to_string()))?;
        Ok(Box::new(NatsPushConsumer::new(
            subscriber,
            self.handle.clone(),
        )))
    }

    fn pull_subscribe(
        &self,
        subject: &str,
        options: &PullOptions,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        let stream_name = options
            .stream
            .clone()
            .unwrap_or_else(|| stream_name_for(subject));
        let consumer_name = options
            .durable
            .clone()
            .unwrap_or_else(|| format!("pull-{}", Uuid::new_v4().simple()));
        let subject = subject.to_string();

        let consumer = self.handle.block_on(async {
            self.context
                .get_or_create_stream(jetstream::stream::Config {
                    name: stream_name.clone(),
                    subjects: vec![subject.clone()],
                    ..Default::default()
                })
                .await
                .map_err(|error| BrokerError::Subscribe(error.to_string()))?;
            self.context
                .create_consumer_on_stream(
                    jetstream::consumer::pull::Config {
                        durable_name: Some(consumer_name.clone()),
                        filter_subject: subject,
                        ..Default::default()
                    },
                    stream_name.clone(),
                )
                .await
                .map_err(|error| BrokerError::Subscribe(error.to_string()))
        })?;

        Ok(Box::new(NatsPullConsumer::new(
            consumer,
            self.context.clone(),
            stream_name,
            consumer_name,
            self.handle.clone(),
        )))
    }

    fn flush(&self) -> Result<(), BrokerError> {
        self.handle
            .block_on(self.client.flush())
            .map_err(|error| BrokerError::Io(error.to_string()))
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.handle
            .block_on(self.client.drain())
            .map_err(|error| BrokerError::Io(error.to_string()))
    }
}
