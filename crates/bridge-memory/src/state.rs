use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use jetbridge::broker::{AckToken, BrokerError};
use jetbridge::message::{Headers, InboundMessage, PublishAck};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// The dedupe header recognized on publish, mirroring the wire convention
/// of the real broker.
pub(crate) const MSG_ID_HEADER: &str = "Nats-Msg-Id";

struct StoredMessage {
    payload: Bytes,
    headers: Option<Headers>,
}

/// A push member's inbox. Filled on publish, drained by the member's
/// blocking consumer.
pub(crate) struct DeliveryQueue {
    queue: Mutex<VecDeque<InboundMessage>>,
    arrived: Condvar,
}

impl DeliveryQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    fn push(&self, message: InboundMessage) {
        self.queue.lock().push_back(message);
        self.arrived.notify_one();
    }

    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<InboundMessage> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if let Some(message) = queue.pop_front() {
                return Some(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self.arrived.wait_for(&mut queue, deadline - now).timed_out() {
                return queue.pop_front();
            }
        }
    }

    /// Wakes a consumer blocked in [`Self::pop_timeout`], for shutdown.
    pub(crate) fn interrupt(&self) {
        self.arrived.notify_all();
    }
}

struct PushMember {
    id: u64,
    queue_group: Option<String>,
    inbox: Arc<DeliveryQueue>,
}

#[derive(Default)]
struct SubjectState {
    messages: Vec<StoredMessage>,
    next_sequence: u64,
    seen_ids: HashMap<String, u64>,
    members: Vec<PushMember>,
    round_robin: HashMap<String, usize>,
}

/// One subject's stream plus its live push members. The condvar wakes pull
/// consumers waiting for the stream to grow.
pub(crate) struct SubjectSlot {
    state: Mutex<SubjectState>,
    appended: Condvar,
}

impl SubjectSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SubjectState::default()),
            appended: Condvar::new(),
        }
    }

    /// Copies the stream message at `cursor`, waiting up to `timeout` for it
    /// to exist. The ack token counts into the broker-wide tally.
    pub(crate) fn read_at(
        &self,
        subject: &str,
        cursor: usize,
        timeout: Duration,
        acked: &Arc<AtomicU64>,
    ) -> Option<InboundMessage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(stored) = state.messages.get(cursor) {
                let message =
                    InboundMessage::new(subject.to_string(), stored.payload.clone(), stored.headers.clone())
                        .with_ack(Arc::new(MemoryAckToken::new(Arc::clone(acked))));
                return Some(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self.appended.wait_for(&mut state, deadline - now).timed_out() && state.messages.len() <= cursor {
                return None;
            }
        }
    }

    pub(crate) fn interrupt(&self) {
        self.appended.notify_all();
    }

    pub(crate) fn remove_member(&self, id: u64) {
        self.state.lock().members.retain(|member| member.id != id);
    }

    pub(crate) fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }
}

/// Acknowledgement for one delivered message. Idempotent; only the first
/// ack counts.
struct MemoryAckToken {
    acked: Arc<AtomicU64>,
    done: AtomicBool,
}

impl MemoryAckToken {
    const fn new(acked: Arc<AtomicU64>) -> Self {
        Self {
            acked,
            done: AtomicBool::new(false),
        }
    }
}

impl AckToken for MemoryAckToken {
    fn ack(&self) -> Result<(), BrokerError> {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.acked.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// The broker-wide shared state behind every connection handle.
pub(crate) struct BrokerState {
    subjects: Mutex<HashMap<String, Arc<SubjectSlot>>>,
    closed: AtomicBool,
    injected_publish_failures: AtomicUsize,
    next_member_id: AtomicU64,
    pub(crate) acked: Arc<AtomicU64>,
}

impl BrokerState {
    pub(crate) fn new() -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            injected_publish_failures: AtomicUsize::new(0),
            next_member_id: AtomicU64::new(0),
            acked: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn slot(&self, subject: &str) -> Arc<SubjectSlot> {
        Arc::clone(
            self.subjects
                .lock()
                .entry(subject.to_string())
                .or_insert_with(|| Arc::new(SubjectSlot::new())),
        )
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for slot in self.subjects.lock().values() {
            slot.interrupt();
            for member in &slot.state.lock().members {
                member.inbox.interrupt();
            }
        }
    }

    pub(crate) fn inject_publish_failures(&self, count: usize) {
        self.injected_publish_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    /// Appends one message to the subject's stream and fans it out to push
    /// members: every plain member receives a copy, and each queue group
    /// delivers to exactly one member, rotating through the group.
    pub(crate) fn publish(
        &self,
        subject: &str,
        headers: Option<&Headers>,
        payload: Bytes,
    ) -> Result<PublishAck, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        if self.take_injected_failure() {
            return Err(BrokerError::Io("injected publish failure".to_string()));
        }

        let slot = self.slot(subject);
        let mut state = slot.state.lock();

        let message_id = headers
            .and_then(|h| h.get(MSG_ID_HEADER))
            .and_then(|values| values.first())
            .cloned();
        if let Some(id) = &message_id {
            if let Some(original) = state.seen_ids.get(id) {
                return Ok(PublishAck {
                    stream: subject.to_string(),
                    sequence: *original,
                    duplicate: true,
                });
            }
        }

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        if let Some(id) = message_id {
            state.seen_ids.insert(id, sequence);
        }
        state.messages.push(StoredMessage {
            payload: payload.clone(),
            headers: headers.cloned(),
        });

        let inbound = InboundMessage::new(subject.to_string(), payload, headers.cloned())
            .with_ack(Arc::new(MemoryAckToken::new(Arc::clone(&self.acked))));
        let mut group_targets: Vec<Arc<DeliveryQueue>> = Vec::new();
        let mut groups: Vec<String> = state
            .members
            .iter()
            .filter_map(|member| member.queue_group.clone())
            .collect();
        groups.sort_unstable();
        groups.dedup();
        for group in groups {
            let members: Vec<usize> = state
                .members
                .iter()
                .enumerate()
                .filter(|(_, member)| member.queue_group.as_deref() == Some(group.as_str()))
                .map(|(index, _)| index)
                .collect();
            if members.is_empty() {
                continue;
            }
            let turn = state.round_robin.entry(group).or_insert(0);
            let chosen = members[*turn % members.len()];
            *turn += 1;
            group_targets.push(Arc::clone(&state.members[chosen].inbox));
        }
        for member in state.members.iter().filter(|m| m.queue_group.is_none()) {
            member.inbox.push(inbound.clone());
        }
        for inbox in group_targets {
            inbox.push(inbound.clone());
        }

        slot.appended.notify_all();
        trace!(subject, sequence, "stored message");
        Ok(PublishAck {
            stream: subject.to_string(),
            sequence,
            duplicate: false,
        })
    }

    /// Registers a push member on `subject`, returning its id and inbox.
    pub(crate) fn add_member(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<(u64, Arc<DeliveryQueue>), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        let slot = self.slot(subject);
        let id = self.next_member_id.fetch_add(1, Ordering::SeqCst);
        let inbox = Arc::new(DeliveryQueue::new());
        slot.state.lock().members.push(PushMember {
            id,
            queue_group: queue_group.map(ToString::to_string),
            inbox: Arc::clone(&inbox),
        });
        Ok((id, inbox))
    }
}
