use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use jetbridge::broker::{BrokerConsumer, BrokerError};
use jetbridge::message::InboundMessage;

use crate::state::{BrokerState, DeliveryQueue, SubjectSlot};

/// Push-mode consumer: drains the inbox its member registration created.
pub(crate) struct MemoryPushConsumer {
    state: Arc<BrokerState>,
    slot: Arc<SubjectSlot>,
    member_id: u64,
    inbox: Arc<DeliveryQueue>,
    detached: bool,
}

impl MemoryPushConsumer {
    pub(crate) fn new(
        state: Arc<BrokerState>,
        slot: Arc<SubjectSlot>,
        member_id: u64,
        inbox: Arc<DeliveryQueue>,
    ) -> Self {
        Self {
            state,
            slot,
            member_id,
            inbox,
            detached: false,
        }
    }
}

impl BrokerConsumer for MemoryPushConsumer {
    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BrokerError> {
        if self.detached {
            return Err(BrokerError::ConnectionClosed);
        }
        // Drain buffered messages even after close; fail only once empty.
        match self.inbox.pop_timeout(timeout) {
            Some(message) => Ok(Some(message)),
            None if self.state.is_closed() => Err(BrokerError::ConnectionClosed),
            None => Ok(None),
        }
    }

    fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        if !self.detached {
            self.detached = true;
            self.slot.remove_member(self.member_id);
        }
        Ok(())
    }
}

/// Pull-mode consumer: a cursor over the subject's stream. Messages
/// published before the subscription existed are still visible.
pub(crate) struct MemoryPullConsumer {
    state: Arc<BrokerState>,
    subject: String,
    slot: Arc<SubjectSlot>,
    cursor: usize,
    acked: Arc<AtomicU64>,
    detached: bool,
}

impl MemoryPullConsumer {
    pub(crate) fn new(state: Arc<BrokerState>, subject: String, slot: Arc<SubjectSlot>) -> Self {
        let acked = Arc::clone(&state.acked);
        Self {
            state,
            subject,
            slot,
            cursor: 0,
            acked,
            detached: false,
        }
    }
}

impl BrokerConsumer for MemoryPullConsumer {
    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BrokerError> {
        if self.detached {
            return Err(BrokerError::ConnectionClosed);
        }
        match self.slot.read_at(&self.subject, self.cursor, timeout, &self.acked) {
            Some(message) => {
                self.cursor += 1;
                Ok(Some(message))
            }
            None if self.state.is_closed() => Err(BrokerError::ConnectionClosed),
            None => Ok(None),
        }
    }

    fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        self.detached = true;
        Ok(())
    }
}
