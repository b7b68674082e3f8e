use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::broker::{AckToken, BrokerError};

/// An ordered multimap of message headers.
///
/// Keys map to the list of values in insertion order, so
/// `headers.get("foo")` observes values exactly as they were appended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends `value` under `key`, keeping any values already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some((_, values)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            values.push(value);
        } else {
            self.entries.push((key, vec![value]));
        }
    }

    /// The values stored under `key`, in insertion order.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    /// Whether no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of distinct header keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over `(key, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }
}

/// Broker acknowledgement metadata for one published message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishAck {
    /// The durable stream that stored the message.
    pub stream: String,
    /// The broker-assigned sequence number.
    pub sequence: u64,
    /// Whether the broker flagged the message as a duplicate.
    pub duplicate: bool,
}

/// A message delivered by the broker.
#[derive(Clone)]
pub struct InboundMessage {
    subject: String,
    payload: Bytes,
    headers: Option<Headers>,
    ack: Option<Arc<dyn AckToken>>,
}

impl InboundMessage {
    /// Creates a message without an acknowledgement capability.
    #[must_use]
    pub const fn new(subject: String, payload: Bytes, headers: Option<Headers>) -> Self {
        Self {
            subject,
            payload,
            headers,
            ack: None,
        }
    }

    /// Attaches an acknowledgement capability (pull-mode / explicit-ack
    /// consumption only).
    #[must_use]
    pub fn with_ack(mut self, token: Arc<dyn AckToken>) -> Self {
        self.ack = Some(token);
        self
    }

    /// The subject the message was published to.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The message payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The message headers, when any were published.
    #[must_use]
    pub const fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// Whether the message carries any headers.
    #[must_use]
    pub fn has_headers(&self) -> bool {
        self.headers.as_ref().is_some_and(|h| !h.is_empty())
    }

    /// Acknowledges the message to the broker. A no-op for messages without
    /// an acknowledgement capability (push-mode deliveries).
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement cannot be enqueued.
    pub fn ack(&self) -> Result<(), BrokerError> {
        match &self.ack {
            Some(token) => token.ack(),
            None => Ok(()),
        }
    }

    pub(crate) fn take_ack_token(&mut self) -> Option<Arc<dyn AckToken>> {
        self.ack.take()
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("headers", &self.headers)
            .field("ackable", &self.ack.is_some())
            .finish()
    }
}

/// An outbound message: subject, payload, optional headers.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub(crate) subject: String,
    pub(crate) payload: Bytes,
    pub(crate) headers: Option<Headers>,
}

impl OutboundMessage {
    /// Creates a message for `subject` carrying `payload`.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: None,
        }
    }

    /// Starts a builder for `subject`.
    pub fn builder(subject: impl Into<String>) -> OutboundMessageBuilder {
        OutboundMessageBuilder {
            subject: subject.into(),
            payload: Bytes::new(),
            headers: None,
        }
    }

    /// The destination subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Builder for [`OutboundMessage`].
#[derive(Clone, Debug)]
pub struct OutboundMessageBuilder {
    subject: String,
    payload: Bytes,
    headers: Option<Headers>,
}

impl OutboundMessageBuilder {
    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Appends one header value.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.get_or_insert_with(Headers::new).insert(key, value);
        self
    }

    /// Finishes the message.
    #[must_use]
    pub fn build(self) -> OutboundMessage {
        OutboundMessage {
            subject: self.subject,
            payload: self.payload,
            headers: self.headers,
        }
    }
}

/// A forward-only, single-pass iterator over one collected batch.
///
/// The batch is materialized before the future resolves, so consuming the
/// iterator never blocks.
#[derive(Debug)]
pub struct MessageIter {
    inner: std::vec::IntoIter<InboundMessage>,
}

impl MessageIter {
    /// The number of messages not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

impl From<Vec<InboundMessage>> for MessageIter {
    fn from(batch: Vec<InboundMessage>) -> Self {
        Self {
            inner: batch.into_iter(),
        }
    }
}

impl Iterator for MessageIter {
    type Item = InboundMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for MessageIter {}
