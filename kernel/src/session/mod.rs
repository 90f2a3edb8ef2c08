// Ledger Session
//
// One open, dataset-scoped batch. Mutations are buffered in memory;
// `flush` provisions tables, pins a revision, stamps every record and
// commits each table's chunk with one bulk insert.
//
// A session is single-owner: mutations take `&mut self`. Logging goes
// through `tracing`; install a subscriber to capture it.

use serde_json::Value;

use crate::buffer::{ChunkKey, RecordBuffer};
use crate::clock::{RevisionClock, WarehouseClock};
use crate::codec::{CompactJsonCodec, PayloadCodec};
use crate::config::{ConfigError, Location, Partition, SchemaVersion, SessionConfig};
use crate::error::LedgerError;
use crate::hash::{ContentHasher, DigestEncoder};
use crate::record::Payload;
use crate::retry::{BackoffPolicy, PollOutcome, Sleeper, ThreadSleeper};
use crate::revision::Revision;
use crate::store::{wait_for_job, Query, StoreError, WarehouseStore};

mod commit;

pub use commit::{CommitReport, TableCommit};

#[cfg(test)]
mod tests;

pub struct LedgerSession<S: WarehouseStore> {
    store: S,
    config: SessionConfig,
    hasher: ContentHasher,
    codec: Box<dyn PayloadCodec>,
    clock: Option<Box<dyn RevisionClock>>,
    sleeper: Box<dyn Sleeper>,
    buffer: RecordBuffer,
    dataset: Option<String>,
    revision: Revision,
}

impl<S: WarehouseStore> LedgerSession<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, SessionConfig::default())
    }

    pub fn with_config(store: S, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            hasher: ContentHasher::default(),
            codec: Box::new(CompactJsonCodec),
            clock: None,
            sleeper: Box::new(ThreadSleeper),
            buffer: RecordBuffer::new(),
            dataset: None,
            revision: Revision::UNASSIGNED,
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_location(&mut self, location: &str) -> Result<(), LedgerError> {
        self.config.location = location.parse::<Location>()?;
        Ok(())
    }

    /// Route subsequent mutations to `<table>_<partition>`.
    pub fn set_partition(&mut self, partition: i64) -> Result<(), LedgerError> {
        self.config.partition = Some(Partition::new(partition)?);
        Ok(())
    }

    /// Schema version stamped on subsequent mutations.
    pub fn set_version(&mut self, version: &str) -> Result<(), LedgerError> {
        self.config.version = SchemaVersion::parse(version)?;
        Ok(())
    }

    pub fn set_backoff(&mut self, backoff: BackoffPolicy) {
        self.config.backoff = backoff;
    }

    pub fn set_encoder(&mut self, encoder: Box<dyn DigestEncoder>) {
        self.hasher = ContentHasher::new(encoder);
    }

    pub fn set_codec(&mut self, codec: Box<dyn PayloadCodec>) {
        self.codec = codec;
    }

    /// Replace the warehouse clock as the revision source.
    pub fn set_clock(&mut self, clock: Box<dyn RevisionClock>) {
        self.clock = Some(clock);
    }

    /// Used between polls of remote queries.
    pub fn set_sleeper(&mut self, sleeper: Box<dyn Sleeper>) {
        self.sleeper = sleeper;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    /// Revision of this session; unassigned until the first flush.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Number of buffered mutations.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open a new batch against `dataset`, creating it if needed.
    ///
    /// Discards anything buffered and unpins the revision.
    pub fn start(&mut self, dataset: &str) -> Result<(), LedgerError> {
        self.revision = Revision::UNASSIGNED;
        self.buffer.reset();
        self.dataset = None;

        if !self.store.dataset_exists(dataset)? {
            match self.store.create_dataset(dataset, self.config.location) {
                Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
            tracing::info!(dataset, location = %self.config.location, "created dataset");
        }

        self.dataset = Some(dataset.to_string());
        tracing::info!(dataset, "session started");
        Ok(())
    }

    /// Buffer an upsert. No I/O.
    pub fn add(
        &mut self,
        table: &str,
        uid: &str,
        payload: Value,
        parent_uid: Option<&str>,
    ) -> Result<(), LedgerError> {
        let payload = Payload::from_value(payload)?;
        self.add_payload(table, uid, payload, parent_uid);
        Ok(())
    }

    pub fn add_payload(
        &mut self,
        table: &str,
        uid: &str,
        payload: Payload,
        parent_uid: Option<&str>,
    ) {
        let key = self.chunk_key(table);
        let version = self.config.version.as_str().to_string();
        self.buffer
            .enqueue_upsert(key, uid, payload, parent_uid, &version);
    }

    /// Buffer a tombstone. No I/O.
    pub fn delete(&mut self, table: &str, uid: &str) {
        let key = self.chunk_key(table);
        let version = self.config.version.as_str().to_string();
        self.buffer.enqueue_tombstone(key, uid, &version);
    }

    fn chunk_key(&self, table: &str) -> ChunkKey {
        ChunkKey::new(table, &self.config.partition_suffix())
    }

    /// Commit everything buffered under one revision.
    ///
    /// On any error the buffer is left as it was, so the whole flush can
    /// be retried. Tables committed before the failing one keep their
    /// rows.
    pub fn flush(&mut self) -> Result<CommitReport, LedgerError> {
        let dataset = self
            .dataset
            .clone()
            .ok_or_else(|| ConfigError("flush called before start".into()))?;
        let _span = tracing::info_span!("flush", dataset = %dataset).entered();

        for key in self.buffer.keys() {
            commit::provision_table(&self.store, &dataset, &key.physical_table())?;
        }

        if !self.revision.is_assigned() {
            self.revision = self.read_clock()?;
            tracing::info!(revision = %self.revision, "revision pinned");
        }

        let chunks = commit::stamp_buffer(
            &self.buffer,
            self.revision,
            &self.hasher,
            self.codec.as_ref(),
        )?;

        let mut tables = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let rows = commit::submit_chunk(&self.store, &dataset, chunk)?;
            if rows > 0 {
                tracing::info!(table = %chunk.table, rows, "committed chunk");
            }
            tables.push(TableCommit {
                table: chunk.table.clone(),
                rows,
            });
        }

        self.buffer.clear_records();
        tracing::info!(revision = %self.revision, "ready");

        Ok(CommitReport {
            revision: self.revision,
            tables,
        })
    }

    fn read_clock(&self) -> Result<Revision, LedgerError> {
        let revision = match &self.clock {
            Some(clock) => clock.current_revision()?,
            None => WarehouseClock::new(&self.store, self.config.backoff, self.sleeper.as_ref())
                .current_revision()?,
        };
        Ok(revision)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Largest value at `json_path` in a table's payloads, quotes stripped.
    ///
    /// `None` when the dataset or table does not exist, or the table has
    /// no value at that path.
    pub fn fetch_max_json_value(
        &self,
        dataset: &str,
        table: &str,
        json_path: &str,
    ) -> Result<Option<String>, LedgerError> {
        if !self.store.dataset_exists(dataset)? || !self.store.table_exists(dataset, table)? {
            return Ok(None);
        }

        let query = Query::MaxJsonValue {
            dataset: dataset.to_string(),
            table: table.to_string(),
            json_path: json_path.to_string(),
        };
        let mut handle = self.store.run_query(&query)?;

        let outcome = wait_for_job(
            &self.store,
            &mut handle,
            &self.config.backoff,
            self.sleeper.as_ref(),
        )?;
        if let PollOutcome::TimedOut { attempts } = outcome {
            return Err(LedgerError::QueryTimeout { attempts });
        }

        let value = self
            .store
            .first_row(&handle)?
            .and_then(|mut row| row.remove("value"));

        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.trim_matches('"').to_string()),
            Some(other) => Some(other.to_string().trim_matches('"').to_string()),
        })
    }
}
