use thiserror::Error as ThisError;

/// Errors raised while establishing a NATS-backed client.
#[derive(Debug, ThisError)]
pub enum ConnectError {
    /// The initial connection to the server failed.
    #[error(transparent)]
    Connect(#[from] async_nats::ConnectError),

    /// Called from outside a tokio runtime.
    #[error("a running tokio runtime is required: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}
