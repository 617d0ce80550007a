//! Chunked data exchange: splitting, reassembly, and transfer records.
//!
//! A transfer moves an arbitrary payload as ordered chunks of at most the
//! configured chunk size. The sender emits chunks in ascending sequence;
//! the receiver stores them by explicit sequence number, so transport
//! reordering and duplicate delivery are both tolerated.

use std::collections::{BTreeMap, HashMap};

use lattice_messages::Chunk;
use lattice_types::{NodeId, Timestamp};

/// Lifecycle of one transfer record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Whether this status will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Bookkeeping for one transfer, on either side.
#[derive(Clone, Debug)]
pub struct TransferRecord {
    pub transfer_id: u64,
    pub source: NodeId,
    pub destination: NodeId,
    pub data_type: String,
    pub total_size: usize,
    pub transferred: usize,
    pub status: TransferStatus,
    pub started: Timestamp,
    pub last_update: Timestamp,
}

/// Split a payload into chunks of at most `chunk_size` bytes (a zero size
/// falls back to the protocol default).
///
/// Produces exactly `⌈len/chunk_size⌉` chunks, all advertising the same
/// total, with only the final one flagged as last. Empty payloads produce
/// no chunks.
pub fn split_chunks(data: &[u8], chunk_size: usize, transfer_id: u64) -> Vec<Chunk> {
    let chunk_size = if chunk_size == 0 {
        lattice_types::params::DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };

    let total_chunks = data.len().div_ceil(chunk_size) as u32;
    let mut chunks = Vec::with_capacity(total_chunks as usize);

    for (sequence, piece) in data.chunks(chunk_size).enumerate() {
        let sequence = sequence as u32;
        chunks.push(Chunk {
            transfer_id,
            sequence,
            total_chunks,
            data: piece.to_vec(),
            is_last: sequence == total_chunks - 1,
        });
    }
    chunks
}

/// Receiver-side reassembly buffer for one transfer.
#[derive(Debug, Default)]
pub struct ChunkAssembly {
    chunks: BTreeMap<u32, Chunk>,
}

impl ChunkAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk. Returns the number of payload bytes newly added —
    /// zero for a duplicate sequence number.
    pub fn insert(&mut self, chunk: Chunk) -> usize {
        if self.chunks.contains_key(&chunk.sequence) {
            return 0;
        }
        let added = chunk.data.len();
        self.chunks.insert(chunk.sequence, chunk);
        added
    }

    /// The advertised chunk count, once any chunk has arrived.
    pub fn total_chunks(&self) -> Option<u32> {
        self.chunks.values().next().map(|chunk| chunk.total_chunks)
    }

    pub fn received_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_complete(&self) -> bool {
        match self.total_chunks() {
            Some(total) => self.chunks.len() as u32 == total,
            None => false,
        }
    }

    /// Concatenate by ascending sequence number. `None` until complete.
    pub fn reassemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let total: usize = self.chunks.values().map(|chunk| chunk.data.len()).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in self.chunks.values() {
            out.extend_from_slice(&chunk.data);
        }
        Some(out)
    }
}

/// Outgoing and incoming transfer records plus counters.
#[derive(Debug, Default)]
pub struct TransferTable {
    outgoing: HashMap<u64, TransferRecord>,
    incoming: HashMap<u64, TransferRecord>,
    bytes_sent: u64,
    bytes_received: u64,
    completed: u64,
    failed: u64,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A random non-zero transfer id.
    pub fn generate_transfer_id() -> u64 {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return id;
            }
        }
    }

    // ── Outgoing side ───────────────────────────────────────────────────

    pub fn begin_outgoing(
        &mut self,
        transfer_id: u64,
        source: NodeId,
        destination: NodeId,
        data_type: String,
        total_size: usize,
        now: Timestamp,
    ) {
        self.outgoing.insert(
            transfer_id,
            TransferRecord {
                transfer_id,
                source,
                destination,
                data_type,
                total_size,
                transferred: 0,
                status: TransferStatus::InProgress,
                started: now,
                last_update: now,
            },
        );
    }

    /// Advance an outgoing record after a chunk was handed off.
    pub fn note_sent(&mut self, transfer_id: u64, bytes: usize, now: Timestamp) {
        if let Some(record) = self.outgoing.get_mut(&transfer_id) {
            record.transferred += bytes;
            record.last_update = now;
        }
        self.bytes_sent += bytes as u64;
    }

    pub fn outgoing_status(&self, transfer_id: u64) -> Option<TransferStatus> {
        self.outgoing.get(&transfer_id).map(|record| record.status)
    }

    /// Move an outgoing record to a terminal status. Returns the record's
    /// final snapshot when the transition happened.
    pub fn finish_outgoing(
        &mut self,
        transfer_id: u64,
        status: TransferStatus,
        now: Timestamp,
    ) -> Option<TransferRecord> {
        let record = self.outgoing.get_mut(&transfer_id)?;
        if record.status.is_terminal() {
            return None;
        }
        record.status = status;
        record.last_update = now;
        match status {
            TransferStatus::Completed => self.completed += 1,
            TransferStatus::Failed => self.failed += 1,
            _ => {}
        }
        Some(record.clone())
    }

    /// Cooperative cancel: flips an outgoing in-progress record so the
    /// sending loop stops before its next chunk.
    pub fn cancel(&mut self, transfer_id: u64, now: Timestamp) -> bool {
        match self.outgoing.get_mut(&transfer_id) {
            Some(record) if record.status == TransferStatus::InProgress => {
                record.status = TransferStatus::Cancelled;
                record.last_update = now;
                true
            }
            _ => false,
        }
    }

    // ── Incoming side ───────────────────────────────────────────────────

    /// Create the incoming record if this is the first sign of the
    /// transfer, then account the received bytes.
    pub fn note_received(
        &mut self,
        transfer_id: u64,
        source: NodeId,
        destination: NodeId,
        bytes: usize,
        now: Timestamp,
    ) {
        let record = self
            .incoming
            .entry(transfer_id)
            .or_insert_with(|| TransferRecord {
                transfer_id,
                source,
                destination,
                data_type: String::new(),
                total_size: 0,
                transferred: 0,
                status: TransferStatus::InProgress,
                started: now,
                last_update: now,
            });
        record.transferred += bytes;
        record.last_update = now;
        if record.status == TransferStatus::Pending {
            record.status = TransferStatus::InProgress;
        }
        self.bytes_received += bytes as u64;
    }

    /// Pre-announce an incoming transfer (from a transfer request):
    /// records the declared size and data type before any chunk lands.
    pub fn expect_incoming(
        &mut self,
        transfer_id: u64,
        source: NodeId,
        destination: NodeId,
        data_type: String,
        total_size: usize,
        now: Timestamp,
    ) {
        self.incoming
            .entry(transfer_id)
            .or_insert_with(|| TransferRecord {
                transfer_id,
                source,
                destination,
                data_type: data_type.clone(),
                total_size,
                transferred: 0,
                status: TransferStatus::Pending,
                started: now,
                last_update: now,
            });
    }

    /// Complete an incoming record once reassembly produced the payload.
    pub fn finish_incoming(
        &mut self,
        transfer_id: u64,
        final_size: usize,
        now: Timestamp,
    ) -> Option<TransferRecord> {
        let record = self.incoming.get_mut(&transfer_id)?;
        record.status = TransferStatus::Completed;
        record.total_size = final_size;
        record.last_update = now;
        Some(record.clone())
    }

    pub fn incoming_record(&self, transfer_id: u64) -> Option<&TransferRecord> {
        self.incoming.get(&transfer_id)
    }

    pub fn outgoing_record(&self, transfer_id: u64) -> Option<&TransferRecord> {
        self.outgoing.get(&transfer_id)
    }

    /// Either side's record, outgoing first.
    pub fn record(&self, transfer_id: u64) -> Option<&TransferRecord> {
        self.outgoing
            .get(&transfer_id)
            .or_else(|| self.incoming.get(&transfer_id))
    }

    /// Every in-progress transfer, outgoing then incoming.
    pub fn active(&self) -> Vec<TransferRecord> {
        self.outgoing
            .values()
            .chain(self.incoming.values())
            .filter(|record| record.status == TransferStatus::InProgress)
            .cloned()
            .collect()
    }

    /// Drop terminal records idle past `timeout_secs`. Returns the ids
    /// removed, so the caller can drop the matching reassembly buffers.
    pub fn cleanup(&mut self, timeout_secs: u64, now: Timestamp) -> Vec<u64> {
        let mut removed = Vec::new();
        for table in [&mut self.outgoing, &mut self.incoming] {
            table.retain(|&id, record| {
                let drop = record.status.is_terminal()
                    && record.last_update.has_expired(timeout_secs, now);
                if drop {
                    removed.push(id);
                }
                !drop
            });
        }
        removed
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }
}
