// Record Buffer
//
// Pending mutations of the open batch, grouped into chunks by
// table and partition suffix. Appends only; no I/O.

use std::collections::BTreeMap;
use std::fmt;

use crate::record::{BufferedRecord, Payload};

/// Destination of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey {
    pub table: String,
    pub partition_suffix: String,
}

impl ChunkKey {
    pub fn new(table: &str, partition_suffix: &str) -> Self {
        Self {
            table: table.to_string(),
            partition_suffix: partition_suffix.to_string(),
        }
    }

    /// Table name in the warehouse.
    pub fn physical_table(&self) -> String {
        format!("{}{}", self.table, self.partition_suffix)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.table, self.partition_suffix)
    }
}

/// Chunks of the currently open batch.
///
/// Every mutation is kept in arrival order, including repeated
/// mutations of one uid.
#[derive(Debug, Clone, Default)]
pub struct RecordBuffer {
    chunks: BTreeMap<ChunkKey, Vec<BufferedRecord>>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: ChunkKey, record: BufferedRecord) {
        self.chunks.entry(key).or_default().push(record);
    }

    pub fn enqueue_upsert(
        &mut self,
        key: ChunkKey,
        uid: &str,
        payload: Payload,
        parent_uid: Option<&str>,
        version: &str,
    ) {
        self.enqueue(key, BufferedRecord::upsert(uid, payload, parent_uid, version));
    }

    pub fn enqueue_tombstone(&mut self, key: ChunkKey, uid: &str, version: &str) {
        self.enqueue(key, BufferedRecord::tombstone(uid, version));
    }

    /// Every chunk seen since the last reset, including emptied ones.
    pub fn chunks(&self) -> impl Iterator<Item = (&ChunkKey, &[BufferedRecord])> {
        self.chunks.iter().map(|(key, records)| (key, records.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.chunks.keys()
    }

    /// Number of buffered records across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.values().all(Vec::is_empty)
    }

    /// Drop buffered records but remember the chunk keys, so the
    /// next flush still checks those tables.
    pub fn clear_records(&mut self) {
        for records in self.chunks.values_mut() {
            records.clear();
        }
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.chunks.clear();
    }
}
