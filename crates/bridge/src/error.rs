use thiserror::Error as ThisError;

use crate::broker::BrokerError;

/// Errors surfaced on the futures returned by this crate.
///
/// Failures local to a single call (duplicate or unknown subscription) are
/// reported only on that call's future. Failures that reflect the shared
/// connection's health are additionally broadcast through the
/// [`ExceptionRoute`](crate::route::ExceptionRoute).
#[derive(Debug, ThisError)]
pub enum Error {
    /// The broker is unreachable or the connection failed mid-operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// A subscription already exists for the subject.
    #[error("subscription already exists for subject {0}")]
    DuplicateSubscription(String),

    /// No active subscription (or none of the required mode) for the subject.
    #[error("no active subscription for subject {0}")]
    UnknownSubscription(String),

    /// A caller-supplied message handler failed during delivery. Contained
    /// by the dispatcher; delivery of subsequent messages continues.
    #[error("message handler failed: {0}")]
    Handler(String),

    /// The client has been ended.
    #[error("client is closed")]
    Closed,
}

impl From<BrokerError> for Error {
    fn from(error: BrokerError) -> Self {
        Self::Connection(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_map_to_connection() {
        let error: Error = BrokerError::ConnectionClosed.into();
        assert!(matches!(error, Error::Connection(_)));
    }
}
