// Commit Orchestration
//
// Pieces of a flush: provisioning, stamping and per-table bulk
// writes. The session sequences them; nothing here holds state.

use serde::Serialize;

use crate::buffer::RecordBuffer;
use crate::codec::PayloadCodec;
use crate::error::LedgerError;
use crate::hash::ContentHasher;
use crate::record::{BufferedRecord, RecordId, StampedRecord};
use crate::revision::Revision;
use crate::schema::ledger_schema;
use crate::store::{FailedRow, InsertReport, StoreError, WarehouseStore};

/// Rows written to one physical table by a flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCommit {
    pub table: String,
    pub rows: usize,
}

/// Outcome of a successful flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub revision: Revision,
    pub tables: Vec<TableCommit>,
}

impl CommitReport {
    pub fn rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Stamped records bound for one physical table.
#[derive(Debug, Clone)]
pub(crate) struct StampedChunk {
    pub table: String,
    pub records: Vec<StampedRecord>,
}

/// Create the table with the ledger schema unless it already exists.
///
/// Returns whether a table was created. Losing a creation race counts
/// as success.
pub(crate) fn provision_table<S: WarehouseStore + ?Sized>(
    store: &S,
    dataset: &str,
    table: &str,
) -> Result<bool, StoreError> {
    if store.table_exists(dataset, table)? {
        return Ok(false);
    }
    match store.create_table(dataset, table, &ledger_schema()) {
        Ok(()) => {
            tracing::debug!(dataset, table, "created ledger table");
            Ok(true)
        }
        Err(StoreError::AlreadyExists(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

pub(crate) fn stamp(
    record: &BufferedRecord,
    revision: Revision,
    hasher: &ContentHasher,
    codec: &dyn PayloadCodec,
) -> Result<StampedRecord, LedgerError> {
    let json = codec.encode(&record.payload)?;
    let hash = hasher.digest(
        &record.uid,
        record.parent_uid.as_deref(),
        &record.version,
        &json,
    );

    Ok(StampedRecord {
        id: RecordId::new(revision, &record.uid).to_string(),
        revision,
        parent_uid: record.parent_uid.clone(),
        uid: record.uid.clone(),
        hash,
        event: record.event,
        version: record.version.clone(),
        json,
    })
}

/// Stamp every buffered record. The buffer itself is left untouched.
pub(crate) fn stamp_buffer(
    buffer: &RecordBuffer,
    revision: Revision,
    hasher: &ContentHasher,
    codec: &dyn PayloadCodec,
) -> Result<Vec<StampedChunk>, LedgerError> {
    buffer
        .chunks()
        .map(|(key, records)| -> Result<StampedChunk, LedgerError> {
            let records = records
                .iter()
                .map(|record| stamp(record, revision, hasher, codec))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StampedChunk {
                table: key.physical_table(),
                records,
            })
        })
        .collect()
}

/// Write one chunk with a single bulk insert. Empty chunks are skipped.
pub(crate) fn submit_chunk<S: WarehouseStore + ?Sized>(
    store: &S,
    dataset: &str,
    chunk: &StampedChunk,
) -> Result<usize, LedgerError> {
    if chunk.records.is_empty() {
        return Ok(0);
    }

    let rows = chunk
        .records
        .iter()
        .map(StampedRecord::to_row)
        .collect::<Result<Vec<_>, _>>()?;

    let report = store.bulk_insert(dataset, &chunk.table, &rows)?;
    if !report.successful {
        let failures = describe_failures(&report);
        tracing::warn!(
            dataset,
            table = %chunk.table,
            failed = failures.len(),
            "bulk insert rejected rows"
        );
        return Err(LedgerError::CommitFailure {
            table: chunk.table.clone(),
            failures,
        });
    }

    Ok(rows.len())
}

fn describe_failures(report: &InsertReport) -> Vec<String> {
    if report.failed_rows.is_empty() {
        return vec!["insert reported failure without row errors".to_string()];
    }

    report
        .failed_rows
        .iter()
        .flat_map(|failed| {
            let label = row_label(failed);
            failed
                .errors
                .iter()
                .map(move |e| format!("{label}: {}: {}", e.reason, e.message))
        })
        .collect()
}

fn row_label(failed: &FailedRow) -> String {
    match failed.row.get("id").and_then(|v| v.as_str()) {
        Some(id) => format!("row `{id}`"),
        None => "row".to_string(),
    }
}
