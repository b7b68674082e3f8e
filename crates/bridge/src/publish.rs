use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::broker::BrokerConnection;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::message::{Headers, OutboundMessage, PublishAck};
use crate::options::PublishOptions;
use crate::route::ExceptionRoute;

/// Issues acked publishes to the broker and completes them as futures.
///
/// Every failure is also broadcast through the exception route, so
/// connection problems stay observable for callers that never inspect the
/// returned future.
#[derive(Clone)]
pub(crate) struct PublishBridge {
    connection: Arc<dyn BrokerConnection>,
    dispatcher: Dispatcher,
    route: ExceptionRoute,
    timeout: Option<Duration>,
}

impl PublishBridge {
    pub(crate) fn new(
        connection: Arc<dyn BrokerConnection>,
        dispatcher: Dispatcher,
        route: ExceptionRoute,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            connection,
            dispatcher,
            route,
            timeout,
        }
    }

    pub(crate) async fn send(
        &self,
        message: OutboundMessage,
        options: Option<PublishOptions>,
    ) -> Result<PublishAck, Error> {
        let OutboundMessage {
            subject,
            payload,
            mut headers,
        } = message;

        if let Some(options) = options {
            if let Some(message_id) = options.message_id {
                headers
                    .get_or_insert_with(Headers::new)
                    .insert("Nats-Msg-Id", message_id);
            }
        }

        let connection = Arc::clone(&self.connection);
        let call_subject = subject.clone();
        let publish = self
            .dispatcher
            .offload(move || connection.publish(&call_subject, headers.as_ref(), payload));

        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, publish).await {
                Ok(result) => result,
                Err(_) => Err(Error::Connection(format!(
                    "publish to {subject} timed out after {timeout:?}"
                ))),
            },
            None => publish.await,
        };

        match &result {
            Ok(ack) => {
                debug!(subject = %subject, sequence = ack.sequence, "published");
            }
            Err(error) => self.route.broadcast(error),
        }
        result
    }
}
