use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::error::Error;

/// Observes failures broadcast by the bridge.
pub trait ErrorSink: Send + Sync + 'static {
    /// Called once per broadcast failure, in attachment order.
    fn notify(&self, error: &Error);
}

/// Adapts a plain closure into an [`ErrorSink`].
pub struct FnSink<F> {
    f: F,
}

/// Wraps a closure as an [`ErrorSink`].
pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    FnSink { f }
}

impl<F> ErrorSink for FnSink<F>
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    fn notify(&self, error: &Error) {
        (self.f)(error);
    }
}

/// Logs every failure through `tracing`. Always the first sink in a route.
struct LogSink;

impl ErrorSink for LogSink {
    fn notify(&self, error: &Error) {
        error!(%error, "broker failure");
    }
}

/// An ordered chain of failure sinks.
///
/// Every connection-level or handler-level failure is broadcast to all
/// registered sinks, never swallowed silently. Attaching a sink appends it:
/// the default logging sink keeps observing every failure, in attachment
/// order before later sinks.
#[derive(Clone)]
pub struct ExceptionRoute {
    sinks: Arc<RwLock<Vec<Arc<dyn ErrorSink>>>>,
}

impl ExceptionRoute {
    /// Creates a route holding only the default logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sinks: Arc::new(RwLock::new(vec![Arc::new(LogSink) as Arc<dyn ErrorSink>])),
        }
    }

    /// Appends `sink` to the chain. Attaching the same sink twice is a
    /// no-op, so re-wiring after the connection exists is safe.
    pub fn attach(&self, sink: Arc<dyn ErrorSink>) {
        let mut sinks = self.sinks.write();
        if sinks.iter().any(|existing| Arc::ptr_eq(existing, &sink)) {
            return;
        }
        sinks.push(sink);
    }

    /// Broadcasts `error` to every sink, in attachment order.
    pub fn broadcast(&self, error: &Error) {
        // Snapshot first so a sink may attach another sink without deadlock.
        let sinks: Vec<_> = self.sinks.read().clone();
        for sink in sinks {
            sink.notify(error);
        }
    }

    /// The number of attached sinks, including the default logging sink.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }
}

impl Default for ExceptionRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExceptionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionRoute")
            .field("sinks", &self.sink_count())
            .finish()
    }
}
