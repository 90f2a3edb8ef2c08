// In-Memory Warehouse
//
// Process-local `WarehouseStore` for tests, dry runs and the CLI.
// Clones share state, so a test can hand one clone to a session and
// inspect the other.

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::{InsertReport, FailedRow, Query, QueryHandle, Row, RowError, StoreError, WarehouseStore};
use crate::config::Location;
use crate::schema::TableSchema;

/// How long submitted queries take to finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryLatency {
    #[default]
    Immediate,

    /// Complete after this many reloads of the handle.
    AfterReloads(u32),

    Never,
}

/// Record of one `bulk_insert` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCall {
    pub dataset: String,
    pub table: String,
    pub rows: usize,
    pub accepted: bool,
}

#[derive(Debug)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

#[derive(Debug)]
struct Job {
    reloads_left: Option<u32>,
    result: Option<Row>,
}

#[derive(Debug, Default)]
struct WarehouseState {
    datasets: BTreeMap<String, Location>,
    tables: BTreeMap<(String, String), StoredTable>,
    jobs: HashMap<Uuid, Job>,
    latency: QueryLatency,
    clock_reading: Option<String>,
    rejected: HashMap<String, RowError>,
    inserts: Vec<InsertCall>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouse {
    state: Arc<RwLock<WarehouseState>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `CurrentTimestamp` with this text instead of the system clock.
    pub fn set_clock_reading(&self, reading: impl Into<String>) {
        self.state.write().clock_reading = Some(reading.into());
    }

    pub fn set_query_latency(&self, latency: QueryLatency) {
        self.state.write().latency = latency;
    }

    /// Fail every inserted row whose `uid` column equals `uid`.
    pub fn reject_uid(&self, uid: &str, reason: &str, message: &str) {
        self.state.write().rejected.insert(
            uid.to_string(),
            RowError {
                reason: reason.to_string(),
                message: message.to_string(),
            },
        );
    }

    pub fn clear_rejections(&self) {
        self.state.write().rejected.clear();
    }

    pub fn dataset_location(&self, dataset: &str) -> Option<Location> {
        self.state.read().datasets.get(dataset).copied()
    }

    pub fn table_schema(&self, dataset: &str, table: &str) -> Option<TableSchema> {
        self.state
            .read()
            .tables
            .get(&(dataset.to_string(), table.to_string()))
            .map(|t| t.schema.clone())
    }

    /// Physical table names of a dataset.
    pub fn tables(&self, dataset: &str) -> Vec<String> {
        self.state
            .read()
            .tables
            .keys()
            .filter(|(ds, _)| ds == dataset)
            .map(|(_, table)| table.clone())
            .collect()
    }

    pub fn rows(&self, dataset: &str, table: &str) -> Vec<Row> {
        self.state
            .read()
            .tables
            .get(&(dataset.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn insert_calls(&self) -> Vec<InsertCall> {
        self.state.read().inserts.clone()
    }

    fn evaluate(state: &WarehouseState, query: &Query) -> Result<Row, StoreError> {
        let mut row = Row::new();
        match query {
            Query::CurrentTimestamp => {
                let reading = state.clock_reading.clone().unwrap_or_else(|| {
                    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()
                });
                row.insert("ts".into(), Value::String(reading));
            }
            Query::MaxJsonValue {
                dataset,
                table,
                json_path,
            } => {
                let stored = state
                    .tables
                    .get(&(dataset.clone(), table.clone()))
                    .ok_or_else(|| StoreError::NotFound(format!("{dataset}.{table}")))?;
                let mut max: Option<String> = None;
                for stored_row in &stored.rows {
                    let Some(extracted) = extract_json(stored_row, json_path)? else {
                        continue;
                    };
                    if max.as_ref().map_or(true, |current| extracted > *current) {
                        max = Some(extracted);
                    }
                }
                row.insert("value".into(), max.map_or(Value::Null, Value::String));
            }
        }
        Ok(row)
    }
}

/// JSON text found at a `$.a.b` path inside a row's `json` column.
fn extract_json(row: &Row, json_path: &str) -> Result<Option<String>, StoreError> {
    let Some(rest) = json_path.strip_prefix('$') else {
        return Err(StoreError::Backend(format!("unsupported json path `{json_path}`")));
    };
    let Some(raw) = row.get("json").and_then(Value::as_str) else {
        return Ok(None);
    };
    let Ok(mut current) = serde_json::from_str::<Value>(raw) else {
        return Ok(None);
    };

    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        match current.get_mut(segment) {
            Some(next) => current = next.take(),
            None => return Ok(None),
        }
    }

    Ok(match current {
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

impl WarehouseStore for InMemoryWarehouse {
    fn dataset_exists(&self, dataset: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().datasets.contains_key(dataset))
    }

    fn create_dataset(&self, dataset: &str, location: Location) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.datasets.contains_key(dataset) {
            return Err(StoreError::AlreadyExists(dataset.to_string()));
        }
        state.datasets.insert(dataset.to_string(), location);
        Ok(())
    }

    fn table_exists(&self, dataset: &str, table: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .tables
            .contains_key(&(dataset.to_string(), table.to_string())))
    }

    fn create_table(
        &self,
        dataset: &str,
        table: &str,
        schema: &TableSchema,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.datasets.contains_key(dataset) {
            return Err(StoreError::NotFound(dataset.to_string()));
        }
        let key = (dataset.to_string(), table.to_string());
        if state.tables.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{dataset}.{table}")));
        }
        state.tables.insert(
            key,
            StoredTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn run_query(&self, query: &Query) -> Result<QueryHandle, StoreError> {
        let mut state = self.state.write();
        let result = Self::evaluate(&state, query)?;
        let reloads_left = match state.latency {
            QueryLatency::Immediate => Some(0),
            QueryLatency::AfterReloads(n) => Some(n),
            QueryLatency::Never => None,
        };

        let job_id = Uuid::new_v4();
        state.jobs.insert(
            job_id,
            Job {
                reloads_left,
                result: Some(result),
            },
        );

        Ok(QueryHandle {
            job_id,
            query: query.clone(),
            done: reloads_left == Some(0),
        })
    }

    fn is_complete(&self, handle: &QueryHandle) -> Result<bool, StoreError> {
        let state = self.state.read();
        let job = state
            .jobs
            .get(&handle.job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", handle.job_id)))?;
        Ok(job.reloads_left == Some(0))
    }

    fn reload(&self, handle: &mut QueryHandle) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get_mut(&handle.job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", handle.job_id)))?;
        if let Some(left) = job.reloads_left.as_mut() {
            *left = left.saturating_sub(1);
        }
        handle.done = job.reloads_left == Some(0);
        Ok(())
    }

    fn first_row(&self, handle: &QueryHandle) -> Result<Option<Row>, StoreError> {
        let state = self.state.read();
        let job = state
            .jobs
            .get(&handle.job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", handle.job_id)))?;
        if job.reloads_left != Some(0) {
            return Err(StoreError::Backend(format!(
                "job {} has not completed",
                handle.job_id
            )));
        }
        Ok(job.result.clone())
    }

    fn bulk_insert(
        &self,
        dataset: &str,
        table: &str,
        rows: &[Row],
    ) -> Result<InsertReport, StoreError> {
        let mut state = self.state.write();
        let key = (dataset.to_string(), table.to_string());
        if !state.tables.contains_key(&key) {
            return Err(StoreError::NotFound(format!("{dataset}.{table}")));
        }

        let failed_rows: Vec<FailedRow> = rows
            .iter()
            .filter_map(|row| {
                let uid = row.get("uid").and_then(Value::as_str)?;
                let error = state.rejected.get(uid)?;
                Some(FailedRow {
                    row: row.clone(),
                    errors: vec![error.clone()],
                })
            })
            .collect();

        let accepted = failed_rows.is_empty();
        state.inserts.push(InsertCall {
            dataset: dataset.to_string(),
            table: table.to_string(),
            rows: rows.len(),
            accepted,
        });

        if !accepted {
            return Ok(InsertReport {
                successful: false,
                failed_rows,
            });
        }

        if let Some(stored) = state.tables.get_mut(&key) {
            stored.rows.extend(rows.iter().cloned());
        }
        Ok(InsertReport::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ledger_schema;
    use serde_json::json;

    fn row(uid: &str, json_text: &str) -> Row {
        let Value::Object(map) = json!({ "uid": uid, "json": json_text }) else {
            unreachable!()
        };
        map
    }

    fn provisioned() -> InMemoryWarehouse {
        let store = InMemoryWarehouse::new();
        store.create_dataset("ds", Location::Eu).unwrap();
        store.create_table("ds", "t", &ledger_schema()).unwrap();
        store
    }

    #[test]
    fn provisioning_reports_duplicates() {
        let store = provisioned();
        assert_eq!(store.dataset_location("ds"), Some(Location::Eu));
        assert!(matches!(
            store.create_table("ds", "t", &ledger_schema()),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.create_table("missing", "t", &ledger_schema()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn rejected_rows_fail_the_whole_call() {
        let store = provisioned();
        store.reject_uid("b", "invalid", "no such field: extra");

        let report = store
            .bulk_insert("ds", "t", &[row("a", "{}"), row("b", "{}"), row("c", "{}")])
            .unwrap();

        assert!(!report.successful);
        assert_eq!(report.failed_rows.len(), 1);
        assert_eq!(report.failed_rows[0].errors[0].reason, "invalid");
        assert!(store.rows("ds", "t").is_empty());
        assert!(!store.insert_calls()[0].accepted);
    }

    #[test]
    fn queries_complete_after_configured_reloads() {
        let store = InMemoryWarehouse::new();
        store.set_query_latency(QueryLatency::AfterReloads(2));
        store.set_clock_reading("2024-01-15 10:30:45.123456 UTC");

        let mut handle = store.run_query(&Query::CurrentTimestamp).unwrap();
        assert!(!store.is_complete(&handle).unwrap());
        assert!(store.first_row(&handle).is_err());

        store.reload(&mut handle).unwrap();
        store.reload(&mut handle).unwrap();
        assert!(handle.done);

        let row = store.first_row(&handle).unwrap().unwrap();
        assert_eq!(row["ts"], "2024-01-15 10:30:45.123456 UTC");
    }

    #[test]
    fn max_json_value_compares_extracted_text() {
        let store = provisioned();
        store
            .bulk_insert(
                "ds",
                "t",
                &[
                    row("a", r#"{"meta":{"at":"2024-01-02"}}"#),
                    row("b", r#"{"meta":{"at":"2024-03-01"}}"#),
                    row("c", r#"{"other":1}"#),
                ],
            )
            .unwrap();

        let query = Query::MaxJsonValue {
            dataset: "ds".into(),
            table: "t".into(),
            json_path: "$.meta.at".into(),
        };
        let handle = store.run_query(&query).unwrap();
        let row = store.first_row(&handle).unwrap().unwrap();
        assert_eq!(row["value"], "\"2024-03-01\"");
    }
}
