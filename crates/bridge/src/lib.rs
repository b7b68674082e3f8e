//! Future-returning bridge over blocking message-broker clients.
//!
//! The broker client underneath this crate is blocking and
//! callback-oriented. Every operation exposed here returns immediately with
//! a future instead: the blocking call runs on a worker thread via
//! [`tokio::task::spawn_blocking`], and its result (or failure) is observed
//! back on the async runtime. Message handlers are invoked in arrival order,
//! one message at a time per subscription, and never from a worker thread.
//!
//! Broker backends implement the traits in [`broker`] and hand a connection
//! to [`Client::new`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The boundary to the wrapped blocking broker client.
pub mod broker;

/// Client handle: connection lifecycle, exception routing, façade factory.
pub mod client;

/// Connection configuration.
pub mod config;

/// Off-thread dispatch of blocking calls and per-subscription delivery.
mod dispatch;

/// Error taxonomy.
pub mod error;

/// Message handlers invoked for push-mode deliveries.
pub mod handler;

/// Message, header, and acknowledgement types.
pub mod message;

/// Per-operation option structs.
pub mod options;

/// Publish bridge: acked publishes as futures.
mod publish;

/// Subject to subscription mapping.
mod registry;

/// Ordered chain of failure sinks.
pub mod route;

/// The client-facing stream façade.
pub mod stream;

pub use broker::{AckToken, BrokerConnection, BrokerConsumer, BrokerError};
pub use client::Client;
pub use config::{ClientConfig, JetStreamOptions};
pub use error::Error;
pub use handler::{FnHandler, MessageHandler, handler_fn};
pub use message::{Headers, InboundMessage, MessageIter, OutboundMessage, PublishAck};
pub use options::{PublishOptions, PullOptions, PushOptions};
pub use route::{ErrorSink, ExceptionRoute, FnSink, sink_fn};
pub use stream::{StreamBridge, Subscription, SubscriptionReadStream};
