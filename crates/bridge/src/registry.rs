use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::broker::BrokerConsumer;
use crate::error::Error;

/// How a subscription consumes messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubscriptionMode {
    Push,
    Pull,
}

/// A shared handle to a pull-mode consumer. Locked only from worker
/// threads, where fetches are allowed to block.
pub(crate) type SharedConsumer = Arc<Mutex<Box<dyn BrokerConsumer>>>;

pub(crate) struct SubscriptionEntry {
    pub(crate) mode: SubscriptionMode,
    pub(crate) queue_group: Option<String>,
    pub(crate) stop: watch::Sender<()>,
    pub(crate) consumer: Option<SharedConsumer>,
}

impl SubscriptionEntry {
    pub(crate) fn push(queue_group: Option<String>, stop: watch::Sender<()>) -> Self {
        Self {
            mode: SubscriptionMode::Push,
            queue_group,
            stop,
            consumer: None,
        }
    }

    pub(crate) fn pull(stop: watch::Sender<()>) -> Self {
        Self {
            mode: SubscriptionMode::Pull,
            queue_group: None,
            stop,
            consumer: None,
        }
    }
}

/// Maps each subject to its single active subscription.
///
/// The one structure mutated from multiple threads: subscribe/unsubscribe
/// run on the runtime while workers report results. All mutation is a
/// short-lived map operation under one mutex; the lock is never held across
/// a blocking call.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    inner: Mutex<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert. Fails when `subject` already has an active
    /// subscription, whatever its mode.
    pub(crate) fn try_insert(&self, subject: &str, entry: SubscriptionEntry) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.contains_key(subject) {
            return Err(Error::DuplicateSubscription(subject.to_string()));
        }
        inner.insert(subject.to_string(), entry);
        Ok(())
    }

    /// Stores the pull-mode consumer created off-thread for `subject`.
    /// Returns `false` when the entry was removed in the meantime.
    pub(crate) fn set_pull_consumer(&self, subject: &str, consumer: SharedConsumer) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(subject) {
            Some(entry) if entry.mode == SubscriptionMode::Pull => {
                entry.consumer = Some(consumer);
                true
            }
            _ => false,
        }
    }

    /// The pull-mode consumer for `subject`; `UnknownSubscription` when the
    /// subject is absent or subscribed in push mode.
    pub(crate) fn pull_consumer(&self, subject: &str) -> Result<SharedConsumer, Error> {
        let inner = self.inner.lock();
        inner
            .get(subject)
            .filter(|entry| entry.mode == SubscriptionMode::Pull)
            .and_then(|entry| entry.consumer.clone())
            .ok_or_else(|| Error::UnknownSubscription(subject.to_string()))
    }

    /// Atomic removal. Only the first removal for a subject succeeds.
    pub(crate) fn remove(&self, subject: &str) -> Result<SubscriptionEntry, Error> {
        self.inner
            .lock()
            .remove(subject)
            .ok_or_else(|| Error::UnknownSubscription(subject.to_string()))
    }

    /// Removes and returns every entry, for shutdown.
    pub(crate) fn drain(&self) -> Vec<SubscriptionEntry> {
        self.inner.lock().drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_entry() -> SubscriptionEntry {
        SubscriptionEntry::push(None, watch::channel(()).0)
    }

    #[test]
    fn second_insert_for_a_subject_fails() {
        let registry = SubscriptionRegistry::new();
        registry.try_insert("orders", push_entry()).unwrap();
        assert!(matches!(
            registry.try_insert("orders", push_entry()),
            Err(Error::DuplicateSubscription(subject)) if subject == "orders"
        ));
    }

    #[test]
    fn remove_succeeds_exactly_once() {
        let registry = SubscriptionRegistry::new();
        registry.try_insert("orders", push_entry()).unwrap();
        assert!(registry.remove("orders").is_ok());
        assert!(matches!(
            registry.remove("orders"),
            Err(Error::UnknownSubscription(_))
        ));
    }

    #[test]
    fn pull_lookup_rejects_push_entries() {
        let registry = SubscriptionRegistry::new();
        registry.try_insert("orders", push_entry()).unwrap();
        assert!(matches!(
            registry.pull_consumer("orders"),
            Err(Error::UnknownSubscription(_))
        ));
    }
}
