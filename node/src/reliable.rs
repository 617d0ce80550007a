//! Reliable delivery: the pending-message table.
//!
//! Each reliable send gets a random 64-bit id and a pending record. Acks
//! flip the record to Acknowledged exactly once; the retry pass re-sends
//! overdue records until the retry cap, then fails them. Pure state
//! machine — the orchestrator does the actual sending and fires the
//! delivered/failed events after releasing this table's lock.

use std::collections::HashMap;

use lattice_messages::Message;
use lattice_types::{NodeId, Timestamp};

/// Acknowledgment state of one reliable message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    Pending,
    Acknowledged,
    Timeout,
    Failed,
}

/// One tracked reliable message.
#[derive(Clone, Debug)]
pub struct PendingMessage {
    pub message_id: u64,
    pub message: Message,
    pub destination: NodeId,
    pub status: AckStatus,
    pub retry_count: u32,
    pub send_time: Timestamp,
    pub last_retry: Timestamp,
}

/// Result of an acknowledge call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// First acknowledgment — fire the delivered event.
    Delivered(NodeId),
    /// Already acknowledged — succeed without re-firing.
    AlreadyAcknowledged,
    /// No such pending message.
    Unknown,
}

/// The pending table plus delivery counters.
#[derive(Debug, Default)]
pub struct PendingTable {
    pending: HashMap<u64, PendingMessage>,
    sent: u64,
    acknowledged: u64,
    failed: u64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A random non-zero message id, unique within this runtime with
    /// overwhelming probability.
    pub fn generate_message_id() -> u64 {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return id;
            }
        }
    }

    /// Track a new message as Pending.
    pub fn track(&mut self, message_id: u64, message: Message, destination: NodeId, now: Timestamp) {
        self.pending.insert(
            message_id,
            PendingMessage {
                message_id,
                message,
                destination,
                status: AckStatus::Pending,
                retry_count: 0,
                send_time: now,
                last_retry: now,
            },
        );
    }

    /// Count a successful initial hand-off.
    pub fn note_sent(&mut self) {
        self.sent += 1;
    }

    /// Pending → Acknowledged, idempotently.
    pub fn acknowledge(&mut self, message_id: u64) -> AckOutcome {
        match self.pending.get_mut(&message_id) {
            Some(record) if record.status == AckStatus::Acknowledged => {
                AckOutcome::AlreadyAcknowledged
            }
            Some(record) => {
                record.status = AckStatus::Acknowledged;
                self.acknowledged += 1;
                AckOutcome::Delivered(record.destination)
            }
            None => AckOutcome::Unknown,
        }
    }

    /// Fail and drop a record, returning it for the failed event.
    pub fn fail(&mut self, message_id: u64) -> Option<PendingMessage> {
        let mut record = self.pending.remove(&message_id)?;
        record.status = AckStatus::Failed;
        self.failed += 1;
        Some(record)
    }

    /// One retry pass. Overdue Pending records below the retry cap get
    /// their counters bumped and are returned for re-sending; records at
    /// the cap are failed, dropped, and returned for the failed event.
    pub fn retry_due(
        &mut self,
        timeout_secs: u64,
        max_retries: u32,
        now: Timestamp,
    ) -> (Vec<(NodeId, Message)>, Vec<PendingMessage>) {
        let mut to_resend = Vec::new();
        let mut exhausted = Vec::new();

        for record in self.pending.values_mut() {
            if record.status != AckStatus::Pending {
                continue;
            }
            if !record.last_retry.has_expired(timeout_secs, now) {
                continue;
            }
            if record.retry_count < max_retries {
                record.retry_count += 1;
                record.last_retry = now;
                to_resend.push((record.destination, record.message.clone()));
            } else {
                record.status = AckStatus::Timeout;
                exhausted.push(record.message_id);
            }
        }

        let mut failed = Vec::new();
        for message_id in exhausted {
            if let Some(record) = self.fail(message_id) {
                failed.push(record);
            }
        }
        (to_resend, failed)
    }

    /// Drop Acknowledged records whose original send is older than
    /// `timeout_secs`. Returns how many were removed.
    pub fn cleanup_acknowledged(&mut self, timeout_secs: u64, now: Timestamp) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, record| {
            record.status != AckStatus::Acknowledged
                || !record.send_time.has_expired(timeout_secs, now)
        });
        before - self.pending.len()
    }

    pub fn status_of(&self, message_id: u64) -> Option<AckStatus> {
        self.pending.get(&message_id).map(|record| record.status)
    }

    /// Percentage of sent messages that were acknowledged.
    pub fn delivery_rate(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.acknowledged as f64 / self.sent as f64 * 100.0
    }

    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    pub fn acknowledged_count(&self) -> u64 {
        self.acknowledged
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .values()
            .filter(|record| record.status == AckStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
