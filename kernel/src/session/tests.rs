use super::*;
use crate::clock::FixedClock;
use crate::hash::Base64UrlEncoder;
use crate::record::RecordId;
use crate::retry::RecordingSleeper;
use crate::schema::ledger_schema;
use crate::store::{InMemoryWarehouse, QueryLatency};
use serde_json::json;
use std::time::Duration;

const READING: &str = "2024-01-15 10:30:45.123456 UTC";
const REVISION: Revision = Revision(240115103045123456);

fn session() -> (LedgerSession<InMemoryWarehouse>, InMemoryWarehouse, RecordingSleeper) {
    let store = InMemoryWarehouse::new();
    store.set_clock_reading(READING);
    let sleeper = RecordingSleeper::new();

    let mut session = LedgerSession::new(store.clone());
    session.set_sleeper(Box::new(sleeper.clone()));
    session.set_backoff(BackoffPolicy::new(3, Duration::from_millis(10)));
    (session, store, sleeper)
}

#[test]
fn add_then_flush_writes_one_stamped_row() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.add("t1", "k1", json!({"a": 1}), None).unwrap();

    let report = session.flush().unwrap();

    assert_eq!(report.revision, REVISION);
    assert_eq!(report.rows(), 1);
    assert_eq!(store.table_schema("ds1", "t1"), Some(ledger_schema()));

    let rows = store.rows("ds1", "t1");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["event"], "UPD");
    assert_eq!(row["json"], r#"{"a":1}"#);
    assert_eq!(row["revision"], json!(REVISION.get()));
    assert_eq!(row["id"], format!("{REVISION}-k1"));
    assert_eq!(row["parent_uid"], Value::Null);
    assert_eq!(row["version"], "1.0.0");

    let expected = ContentHasher::default().digest("k1", None, "1.0.0", r#"{"a":1}"#);
    assert_eq!(row["hash"], expected.as_str());
}

#[test]
fn delete_writes_a_tombstone() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.delete("t1", "k1");
    session.flush().unwrap();

    let rows = store.rows("ds1", "t1");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["event"], "DEL");
    assert_eq!(rows[0]["json"], "{}");
}

#[test]
fn start_creates_dataset_in_configured_location() {
    let (mut session, store, _) = session();
    session.set_location("eu").unwrap();
    session.start("ds1").unwrap();

    assert_eq!(store.dataset_location("ds1"), Some(Location::Eu));
    assert_eq!(session.dataset(), Some("ds1"));

    // an existing dataset is left alone
    session.set_location("US").unwrap();
    session.start("ds1").unwrap();
    assert_eq!(store.dataset_location("ds1"), Some(Location::Eu));
}

#[test]
fn flush_before_start_is_a_configuration_error() {
    let (mut session, _, _) = session();
    session.delete("t1", "k1");

    assert!(matches!(session.flush(), Err(LedgerError::Configuration(_))));
    assert_eq!(session.pending(), 1);
}

#[test]
fn revision_is_reused_until_the_next_start() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.add("t1", "k1", json!({"a": 1}), None).unwrap();
    let first = session.flush().unwrap().revision;

    store.set_clock_reading("2024-02-01 00:00:00 UTC");
    session.add("t1", "k2", json!({"a": 2}), None).unwrap();
    let second = session.flush().unwrap().revision;
    assert_eq!(first, second);

    session.start("ds1").unwrap();
    assert!(!session.revision().is_assigned());
    session.add("t1", "k3", json!({}), None).unwrap();
    let third = session.flush().unwrap().revision;
    assert_eq!(third, Revision(240201000000000000));
}

#[test]
fn flushing_again_submits_nothing() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.add("t1", "k1", json!({"a": 1}), None).unwrap();
    session.flush().unwrap();
    assert_eq!(session.pending(), 0);

    let report = session.flush().unwrap();
    assert_eq!(report.rows(), 0);
    assert_eq!(report.tables[0].table, "t1");
    assert_eq!(store.insert_calls().len(), 1);
    assert_eq!(store.rows("ds1", "t1").len(), 1);
}

#[test]
fn empty_flush_writes_nothing() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();

    let report = session.flush().unwrap();
    assert!(report.tables.is_empty());
    assert!(store.insert_calls().is_empty());
}

#[test]
fn one_revision_spans_every_table() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.add("orders", "o1", json!({"n": 1}), None).unwrap();
    session.add("lines", "l1", json!({"n": 2}), Some("o1")).unwrap();
    session.flush().unwrap();

    let orders = store.rows("ds1", "orders");
    let lines = store.rows("ds1", "lines");
    assert_eq!(orders[0]["revision"], lines[0]["revision"]);
    assert_eq!(lines[0]["parent_uid"], "o1");
}

#[test]
fn clock_timeout_keeps_buffer_and_created_tables() {
    let (mut session, store, sleeper) = session();
    session.start("ds1").unwrap();
    session.add("t1", "k1", json!({"a": 1}), None).unwrap();
    store.set_query_latency(QueryLatency::Never);

    let err = session.flush().unwrap_err();

    assert!(matches!(err, LedgerError::ClockUnavailable { attempts: 3 }));
    assert_eq!(session.pending(), 1);
    assert!(!session.revision().is_assigned());
    assert!(store.table_schema("ds1", "t1").is_some());
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
}

#[test]
fn invalid_clock_reading_fails_the_flush() {
    let (mut session, store, _) = session();
    store.set_clock_reading("garbage");
    session.start("ds1").unwrap();
    session.delete("t1", "k1");

    assert!(matches!(
        session.flush(),
        Err(LedgerError::InvalidTimestamp(_))
    ));
    assert_eq!(session.pending(), 1);
}

#[test]
fn partial_insert_failure_keeps_buffer_for_retry() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    for uid in ["k1", "k2", "k3"] {
        session.add("t1", uid, json!({"uid": uid}), None).unwrap();
    }
    store.reject_uid("k2", "invalid", "json too large");

    let err = session.flush().unwrap_err();
    match &err {
        LedgerError::CommitFailure { table, failures } => {
            assert_eq!(table, "t1");
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("invalid: json too large"));
            assert!(failures[0].contains("-k2"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.pending(), 3);
    let revision = session.revision();
    assert!(revision.is_assigned());

    store.clear_rejections();
    let report = session.flush().unwrap();
    assert_eq!(report.rows(), 3);
    assert_eq!(report.revision, revision);
    assert_eq!(store.rows("ds1", "t1").len(), 3);
}

#[test]
fn earlier_tables_are_not_rolled_back() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.add("a", "a1", json!({}), None).unwrap();
    session.add("b", "b1", json!({}), None).unwrap();
    store.reject_uid("b1", "invalid", "rejected");

    assert!(matches!(
        session.flush(),
        Err(LedgerError::CommitFailure { ref table, .. }) if table == "b"
    ));
    assert_eq!(store.rows("ds1", "a").len(), 1);
    assert!(store.rows("ds1", "b").is_empty());
    assert_eq!(session.pending(), 2);
}

struct ExplodingCodec;

impl PayloadCodec for ExplodingCodec {
    fn encode(&self, payload: &Payload) -> Result<String, LedgerError> {
        if payload.0.contains_key("boom") {
            return Err(LedgerError::InvalidPayload("boom".into()));
        }
        CompactJsonCodec.encode(payload)
    }
}

#[test]
fn stamping_finishes_before_any_write() {
    let (mut session, store, _) = session();
    session.set_codec(Box::new(ExplodingCodec));
    session.start("ds1").unwrap();
    session.add("a", "a1", json!({}), None).unwrap();
    session.add("z", "z1", json!({"boom": true}), None).unwrap();

    assert!(session.flush().is_err());
    assert!(store.insert_calls().is_empty());
    assert_eq!(session.pending(), 2);
}

#[test]
fn partition_suffix_routes_rows() {
    let (mut session, store, _) = session();
    assert!(session.set_partition(0).is_err());
    assert!(session.set_partition(-1).is_err());
    session.set_partition(3).unwrap();
    session.start("ds1").unwrap();
    session.delete("t1", "k1");
    session.flush().unwrap();

    assert_eq!(store.tables("ds1"), vec!["t1_3"]);
}

#[test]
fn version_setter_validates_and_applies_to_new_mutations() {
    let (mut session, store, _) = session();
    assert!(matches!(
        session.set_version("0.0.0"),
        Err(LedgerError::Configuration(_))
    ));
    session.start("ds1").unwrap();
    session.add("t1", "old", json!({}), None).unwrap();
    session.set_version("1.2.3").unwrap();
    session.add("t1", "new", json!({}), None).unwrap();
    session.flush().unwrap();

    let rows = store.rows("ds1", "t1");
    assert_eq!(rows[0]["version"], "1.0.0");
    assert_eq!(rows[1]["version"], "1.2.3");
}

#[test]
fn bad_location_is_rejected() {
    let (mut session, _, _) = session();
    assert!(matches!(
        session.set_location("mars"),
        Err(LedgerError::Configuration(_))
    ));
}

#[test]
fn non_object_payloads_are_rejected_at_add() {
    let (mut session, _, _) = session();
    session.start("ds1").unwrap();

    assert!(matches!(
        session.add("t1", "k1", json!(5), None),
        Err(LedgerError::InvalidPayload(_))
    ));
    session.add("t1", "k1", Value::Null, None).unwrap();
    assert_eq!(session.pending(), 1);
}

#[test]
fn repeated_uids_in_one_revision_produce_duplicate_ids() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.add("t1", "k1", json!({"v": 1}), None).unwrap();
    session.add("t1", "k1", json!({"v": 2}), None).unwrap();
    session.flush().unwrap();

    let rows = store.rows("ds1", "t1");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], rows[1]["id"]);
    assert_ne!(rows[0]["hash"], rows[1]["hash"]);

    let id = RecordId::parse(rows[0]["id"].as_str().unwrap()).unwrap();
    assert_eq!(id, RecordId::new(REVISION, "k1"));
}

#[test]
fn injected_clock_and_encoder_are_used() {
    let (mut session, store, _) = session();
    session.set_clock(Box::new(FixedClock(Revision(42))));
    session.set_encoder(Box::new(Base64UrlEncoder));
    session.start("ds1").unwrap();
    session.delete("t1", "k1");
    session.flush().unwrap();

    let rows = store.rows("ds1", "t1");
    assert_eq!(rows[0]["id"], "42-k1");
    let expected = ContentHasher::new(Box::new(Base64UrlEncoder)).digest("k1", None, "1.0.0", "{}");
    assert_eq!(rows[0]["hash"], expected.as_str());
}

#[test]
fn fetch_max_json_value_reads_watermark() {
    let (mut session, _, _) = session();
    assert_eq!(
        session.fetch_max_json_value("ds1", "t1", "$.at").unwrap(),
        None
    );

    session.start("ds1").unwrap();
    assert_eq!(
        session.fetch_max_json_value("ds1", "t1", "$.at").unwrap(),
        None
    );

    session.add("t1", "k1", json!({"at": "2024-01-02"}), None).unwrap();
    session.add("t1", "k2", json!({"at": "2024-03-04"}), None).unwrap();
    session.add("t1", "k3", json!({"other": 1}), None).unwrap();
    session.flush().unwrap();

    assert_eq!(
        session.fetch_max_json_value("ds1", "t1", "$.at").unwrap(),
        Some("2024-03-04".to_string())
    );
    assert_eq!(
        session.fetch_max_json_value("ds1", "t1", "$.missing").unwrap(),
        None
    );
}

#[test]
fn fetch_max_json_value_times_out() {
    let (mut session, store, _) = session();
    session.start("ds1").unwrap();
    session.delete("t1", "k1");
    session.flush().unwrap();
    store.set_query_latency(QueryLatency::Never);

    assert!(matches!(
        session.fetch_max_json_value("ds1", "t1", "$.at"),
        Err(LedgerError::QueryTimeout { attempts: 3 })
    ));
}
