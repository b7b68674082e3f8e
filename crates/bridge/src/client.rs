use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, info};

use crate::broker::BrokerConnection;
use crate::config::{ClientConfig, JetStreamOptions};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::registry::SubscriptionRegistry;
use crate::route::{ErrorSink, ExceptionRoute};
use crate::stream::StreamBridge;

/// The client handle over one broker connection.
///
/// Construction wires the failure route and, when configured, starts the
/// periodic flush task. Stream façades created from one client share its
/// connection, subscription registry, and failure route, so closing the
/// client invalidates all of them at once.
pub struct Client {
    connection: Arc<dyn BrokerConnection>,
    config: ClientConfig,
    route: ExceptionRoute,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    closed: Arc<AtomicBool>,
    flush_stop: Mutex<Option<watch::Sender<()>>>,
}

impl Client {
    /// Wraps `connection` with `config`, broadcasting failures on `route`.
    ///
    /// Backends pass the same `route` they wire into their own event
    /// callbacks, so connection-level events and bridge-level failures land
    /// in one chain.
    #[must_use]
    pub fn new(
        connection: Arc<dyn BrokerConnection>,
        config: ClientConfig,
        route: ExceptionRoute,
    ) -> Self {
        if let Some(sink) = config.exception_handler.clone() {
            route.attach(sink);
        }

        let dispatcher = Dispatcher::new(route.clone());
        let flush_stop = if config.periodic_flush {
            Some(Self::start_periodic_flush(
                Arc::clone(&connection),
                &dispatcher,
                config.periodic_flush_interval(),
            ))
        } else {
            None
        };

        info!(url = %config.primary_url(), "client connected");
        Self {
            connection,
            config,
            route,
            registry: Arc::new(SubscriptionRegistry::new()),
            dispatcher,
            closed: Arc::new(AtomicBool::new(false)),
            flush_stop: Mutex::new(flush_stop),
        }
    }

    fn start_periodic_flush(
        connection: Arc<dyn BrokerConnection>,
        dispatcher: &Dispatcher,
        interval: std::time::Duration,
    ) -> watch::Sender<()> {
        let (stop_tx, mut stop_rx) = watch::channel(());
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let connection = Arc::clone(&connection);
                        // Flush failures are routed by offload's caller; here
                        // there is none, so log-and-continue is the contract.
                        if let Err(error) = dispatcher.offload(move || connection.flush()).await {
                            debug!(%error, "periodic flush failed");
                        }
                    }
                }
            }
            debug!("periodic flush stopped");
        });
        stop_tx
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Appends `sink` to the failure route. Earlier sinks, including the
    /// default logging sink, keep observing every failure.
    pub fn exception_handler(&self, sink: Arc<dyn ErrorSink>) -> &Self {
        self.route.attach(sink);
        self
    }

    /// Creates a stream façade over this client's connection.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] after [`Self::end`].
    pub fn jet_stream(&self, options: JetStreamOptions) -> Result<StreamBridge, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(StreamBridge::new(
            Arc::clone(&self.connection),
            Arc::clone(&self.registry),
            self.route.clone(),
            Arc::clone(&self.closed),
            options.publish_timeout,
        ))
    }

    /// Flushes buffered outbound data.
    ///
    /// # Errors
    ///
    /// Fails when the connection is down or the client is closed.
    pub async fn flush(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let connection = Arc::clone(&self.connection);
        let result = self.dispatcher.offload(move || connection.flush()).await;
        if let Err(error) = &result {
            self.route.broadcast(error);
        }
        result
    }

    /// Closes the client: stops periodic flushing, tears down every
    /// subscription, and closes the underlying connection. Idempotent;
    /// repeated calls resolve `Ok` without touching the connection again.
    ///
    /// # Errors
    ///
    /// Fails when the underlying connection close reports a failure; the
    /// client is still marked closed.
    pub async fn end(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(stop) = self.flush_stop.lock().take() {
            let _ = stop.send(());
        }

        for entry in self.registry.drain() {
            let _ = entry.stop.send(());
            if let Some(consumer) = entry.consumer {
                if let Err(error) = task::spawn_blocking(move || consumer.lock().unsubscribe())
                    .await
                    .unwrap_or(Ok(()))
                {
                    debug!(%error, "unsubscribe during close failed");
                }
            }
        }

        let connection = Arc::clone(&self.connection);
        let result = self.dispatcher.offload(move || connection.close()).await;
        if let Err(error) = &result {
            self.route.broadcast(error);
        }
        info!("client closed");
        result
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
