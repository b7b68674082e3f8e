use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tracing::{debug, warn};

use crate::broker::{BrokerConsumer, BrokerError};
use crate::error::Error;
use crate::handler::MessageHandler;
use crate::message::InboundMessage;
use crate::route::ExceptionRoute;

/// How long one pump iteration waits for a message before re-checking the
/// stop signal.
const POLL_SLICE: Duration = Duration::from_millis(25);

/// Messages buffered between the pump thread and the delivery task.
const DELIVERY_BUFFER: usize = 64;

/// Offloads blocking broker calls to worker threads and runs the
/// per-subscription delivery pipeline.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    route: ExceptionRoute,
}

impl Dispatcher {
    pub(crate) const fn new(route: ExceptionRoute) -> Self {
        Self { route }
    }

    /// Runs one blocking broker call on a worker thread and observes its
    /// result as a future completion.
    pub(crate) async fn offload<T, F>(&self, call: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BrokerError> + Send + 'static,
    {
        match task::spawn_blocking(call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(error.into()),
            Err(join_error) => Err(Error::Connection(format!(
                "worker task failed: {join_error}"
            ))),
        }
    }

    /// Starts the two-stage delivery pipeline for one push subscription.
    ///
    /// Stage one (worker thread) pulls messages from the blocking consumer
    /// and hands them to stage two over a bounded channel; when `auto_ack`
    /// is set, each message is acknowledged right after a successful
    /// handoff. Stage two (runtime task) invokes the handler in FIFO order,
    /// one message at a time, so a handler is never invoked concurrently
    /// with itself. Handler failures and panics are routed and delivery
    /// continues; broker failures end the subscription.
    pub(crate) fn start_push_delivery(
        &self,
        subject: String,
        mut consumer: Box<dyn BrokerConsumer>,
        handler: Arc<dyn MessageHandler>,
        auto_ack: bool,
        stop: watch::Receiver<()>,
    ) {
        let (tx, rx) = mpsc::channel::<InboundMessage>(DELIVERY_BUFFER);

        let pump_route = self.route.clone();
        let pump_subject = subject.clone();
        task::spawn_blocking(move || {
            loop {
                match stop.has_changed() {
                    Ok(false) => {}
                    // Signalled or sender dropped: the subscription is done.
                    _ => break,
                }
                match consumer.next_timeout(POLL_SLICE) {
                    Ok(Some(mut message)) => {
                        // Unsubscribe may have landed while we were blocked
                        // in the receive; drop the message instead of
                        // delivering past it.
                        if !matches!(stop.has_changed(), Ok(false)) {
                            break;
                        }
                        let ack = if auto_ack {
                            message.take_ack_token()
                        } else {
                            None
                        };
                        if tx.blocking_send(message).is_err() {
                            break;
                        }
                        if let Some(token) = ack {
                            if let Err(error) = token.ack() {
                                pump_route.broadcast(&Error::from(error));
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        pump_route.broadcast(&Error::from(error));
                        break;
                    }
                }
            }
            if let Err(error) = consumer.unsubscribe() {
                debug!(subject = %pump_subject, %error, "unsubscribe on teardown failed");
            }
            debug!(subject = %pump_subject, "delivery pump stopped");
        });

        let delivery_route = self.route.clone();
        tokio::spawn(Self::deliver(subject, rx, handler, delivery_route));
    }

    async fn deliver(
        subject: String,
        mut rx: mpsc::Receiver<InboundMessage>,
        handler: Arc<dyn MessageHandler>,
        route: ExceptionRoute,
    ) {
        while let Some(message) = rx.recv().await {
            let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    route.broadcast(&Error::Handler(error.to_string()));
                }
                Err(_) => {
                    warn!(subject = %subject, "message handler panicked");
                    route.broadcast(&Error::Handler(format!(
                        "handler panicked while processing a message on {subject}"
                    )));
                }
            }
        }
    }
}
