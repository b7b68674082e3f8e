//! In-memory broker backend.
//!
//! Implements the blocking broker traits against process-local state, so
//! the full bridge (publish acks, push delivery, pull fetching, failure
//! routing) can run without a broker. Streams are per-subject and durable
//! for the life of the [`MemoryBroker`]; pull consumers see messages
//! published before they existed, matching durable-consumer semantics.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connection;
mod consumer;
mod state;

pub use connection::{MemoryBroker, MemoryConnection};
