//! NATS JetStream backend for the bridge.
//!
//! [`connect`] establishes an `async-nats` connection and wraps it in a
//! [`jetbridge::Client`]. The blocking broker surface is satisfied by
//! re-entering the runtime from worker threads, so this backend requires a
//! multi-threaded tokio runtime. Push subscriptions use core NATS delivery;
//! pull subscriptions create durable JetStream consumers and fetch bounded
//! batches.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connection;
mod consumer;
mod convert;

/// Connection establishment errors.
pub mod error;

pub use connection::{NatsConnection, connect};
pub use error::ConnectError;
