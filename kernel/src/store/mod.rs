// Warehouse Storage Abstraction
//
// The remote append-only columnar store the ledger commits to.
// The ledger only needs existence checks, provisioning, asynchronous
// scalar queries and bulk row inserts.
//
// This module defines the contract plus an in-memory implementation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::Location;
use crate::retry::{BackoffPolicy, PollOutcome, Sleeper};
use crate::schema::TableSchema;

pub mod memory;

pub use memory::{InMemoryWarehouse, QueryLatency};

/// One row as sent to, or read back from, the warehouse.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Queries the ledger issues against the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    /// The warehouse's current time, as column `ts`.
    CurrentTimestamp,

    /// Largest value at `json_path` inside the `json` column, as column `value`.
    MaxJsonValue {
        dataset: String,
        table: String,
        json_path: String,
    },
}

impl Query {
    /// SQL text for backends that speak SQL.
    pub fn to_sql(&self) -> String {
        match self {
            Query::CurrentTimestamp => "SELECT CURRENT_TIMESTAMP() AS ts".to_string(),
            Query::MaxJsonValue {
                dataset,
                table,
                json_path,
            } => format!(
                "SELECT MAX(JSON_EXTRACT(json, '{}')) AS value FROM `{}.{}`",
                json_path.replace('\\', "\\\\").replace('\'', "\\'"),
                dataset,
                table
            ),
        }
    }
}

/// Handle to a submitted query job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHandle {
    pub job_id: Uuid,
    pub query: Query,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    pub row: Row,
    pub errors: Vec<RowError>,
}

/// Result of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertReport {
    pub successful: bool,
    pub failed_rows: Vec<FailedRow>,
}

impl InsertReport {
    pub fn success() -> Self {
        Self {
            successful: true,
            failed_rows: Vec::new(),
        }
    }
}

/// Remote warehouse the ledger writes to.
///
/// Properties required from implementations:
/// - Append-only: inserted rows are never rewritten
/// - Per-call atomic bulk insert: a call either stores all rows or none
///
/// Methods take `&self`; implementations synchronise internally.
pub trait WarehouseStore {
    fn dataset_exists(&self, dataset: &str) -> Result<bool, StoreError>;

    fn create_dataset(&self, dataset: &str, location: Location) -> Result<(), StoreError>;

    fn table_exists(&self, dataset: &str, table: &str) -> Result<bool, StoreError>;

    fn create_table(&self, dataset: &str, table: &str, schema: &TableSchema)
        -> Result<(), StoreError>;

    /// Submit a query. Completion is observed through the handle.
    fn run_query(&self, query: &Query) -> Result<QueryHandle, StoreError>;

    fn is_complete(&self, handle: &QueryHandle) -> Result<bool, StoreError>;

    /// Refresh the handle's view of its job.
    fn reload(&self, handle: &mut QueryHandle) -> Result<(), StoreError>;

    /// First result row of a completed query.
    fn first_row(&self, handle: &QueryHandle) -> Result<Option<Row>, StoreError>;

    fn bulk_insert(&self, dataset: &str, table: &str, rows: &[Row])
        -> Result<InsertReport, StoreError>;
}

/// Poll a submitted job until it completes or the policy gives up.
///
/// The first attempt checks without reloading; every later attempt
/// reloads the handle before checking.
pub fn wait_for_job<S: WarehouseStore + ?Sized>(
    store: &S,
    handle: &mut QueryHandle,
    backoff: &BackoffPolicy,
    sleeper: &dyn Sleeper,
) -> Result<PollOutcome<()>, StoreError> {
    backoff.poll(sleeper, |attempt| {
        if attempt > 1 {
            store.reload(handle)?;
        }
        let complete = store.is_complete(handle)?;
        tracing::debug!(job = %handle.job_id, attempt, complete, "polled query job");
        Ok(complete.then_some(()))
    })
}
