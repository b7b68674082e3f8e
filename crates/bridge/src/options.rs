/// Options for push-mode subscriptions.
#[derive(Clone, Debug, Default)]
pub struct PushOptions {
    /// Durable name for the broker-side consumer, when the backend supports
    /// one. `None` creates an ephemeral consumer.
    pub durable: Option<String>,

    /// The durable stream to bind to. Defaults to the subject name.
    pub stream: Option<String>,
}

/// Options for pull-mode subscriptions.
#[derive(Clone, Debug, Default)]
pub struct PullOptions {
    /// Durable name for the broker-side consumer. `None` creates an
    /// ephemeral consumer with a generated name.
    pub durable: Option<String>,

    /// The durable stream to bind to. Defaults to the subject name.
    pub stream: Option<String>,
}

/// Options for a single publish.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Message deduplication id, forwarded to the broker as the standard
    /// `Nats-Msg-Id` header.
    pub message_id: Option<String>,
}
