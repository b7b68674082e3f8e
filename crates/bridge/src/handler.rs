use std::error::Error as StdError;

use async_trait::async_trait;

use crate::message::InboundMessage;

/// Failure reported by a message handler.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Processes push-mode deliveries.
///
/// The dispatcher invokes the handler on the async runtime, one message at
/// a time per subscription, in arrival order. Returning an error (or
/// panicking) routes a [`Error::Handler`](crate::Error::Handler) through the
/// exception route and delivery continues with the next message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one delivered message.
    ///
    /// # Errors
    ///
    /// Any error is routed to the exception sinks; it never terminates the
    /// subscription.
    async fn handle(&self, message: InboundMessage) -> Result<(), HandlerError>;
}

/// Adapts a plain closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an infallible closure as a [`MessageHandler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(InboundMessage) + Send + Sync + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(InboundMessage) + Send + Sync + 'static,
{
    async fn handle(&self, message: InboundMessage) -> Result<(), HandlerError> {
        (self.f)(message);
        Ok(())
    }
}
