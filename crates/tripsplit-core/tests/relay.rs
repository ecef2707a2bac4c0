use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use polars::prelude::*;
use serde_json::{json, Value};
use tripsplit_bucket::{MemoryStorage, ObjectStorage};
use tripsplit_core::{
    decode_parquet, CollectingReporter, DecodeError, Relay, RelayError, RelaySettings, RunEvent,
    TableSource, TripTable,
};

const SOURCE: &str = "bronze";
const TARGET: &str = "nyc-taxis-records";

/// Reads presigned `memory://` URLs straight out of a [`MemoryStorage`].
struct MemoryTables {
    storage: Arc<MemoryStorage>,
    reads: AtomicUsize,
    unreachable: Mutex<HashSet<String>>,
}

impl MemoryTables {
    fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            reads: AtomicUsize::new(0),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// Reads of `key` fail as if the endpoint were down.
    fn make_unreachable(&self, key: &str) {
        self.unreachable.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl TableSource for MemoryTables {
    async fn read_table(&self, url: &str) -> Result<TripTable, DecodeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let (bucket, key) = MemoryStorage::resolve_url(url)
            .ok_or_else(|| DecodeError::Fetch(format!("unsupported url {url}")))?;
        if self.unreachable.lock().unwrap().contains(key) {
            return Err(DecodeError::Fetch("connection refused".into()));
        }
        let bytes = self
            .storage
            .get_object(bucket, key)
            .await
            .map_err(|err| DecodeError::Fetch(err.to_string()))?;
        decode_parquet(&bytes)
    }
}

struct Harness {
    storage: Arc<MemoryStorage>,
    tables: Arc<MemoryTables>,
    reporter: Arc<CollectingReporter>,
    relay: Relay,
}

impl Harness {
    fn new(storage: MemoryStorage) -> Self {
        let storage = Arc::new(storage);
        let tables = Arc::new(MemoryTables::new(storage.clone()));
        let reporter = Arc::new(CollectingReporter::new());
        let relay = Relay::new(
            storage.clone(),
            tables.clone(),
            reporter.clone(),
            RelaySettings::default(),
        );
        Self {
            storage,
            tables,
            reporter,
            relay,
        }
    }

    fn body(&self, key: &str) -> Value {
        let object = self
            .storage
            .object(TARGET, key)
            .unwrap_or_else(|| panic!("missing output object {key}"));
        assert_eq!(object.content_type, "application/json");
        serde_json::from_slice(&object.bytes).expect("output is not JSON")
    }

    fn has_event(&self, predicate: impl Fn(&RunEvent) -> bool) -> bool {
        self.reporter.events().iter().any(predicate)
    }
}

fn parquet_bytes(mut frame: DataFrame) -> Vec<u8> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer)
        .finish(&mut frame)
        .expect("failed to write parquet fixture");
    buffer
}

fn two_trips() -> DataFrame {
    df!(
        "VendorID" => [1i32, 2],
        "tpep_pickup_datetime" => ["2024-01-01 08:00:00", "2024-01-02 09:30:00"],
        "passenger_count" => [1i64, 3],
        "fare_amount" => [12.5f64, 30.25],
    )
    .expect("fixture frame")
}

fn source_with(objects: &[(&str, Vec<u8>)]) -> MemoryStorage {
    let storage = MemoryStorage::new().with_bucket(SOURCE);
    for (key, bytes) in objects {
        storage.insert(SOURCE, key, bytes.clone(), "application/octet-stream");
    }
    storage
}

#[tokio::test]
async fn republishes_each_row_under_its_trip_key() -> Result<()> {
    let harness = Harness::new(source_with(&[(
        "nyc_taxi_files/jan.parquet",
        parquet_bytes(two_trips()),
    )]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.matched, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.rows_failed, 0);

    assert_eq!(
        harness.storage.keys(TARGET),
        vec![
            "nyc_taxi_record/trip_1_2024-01-01_08-00-00.json".to_string(),
            "nyc_taxi_record/trip_2_2024-01-02_09-30-00.json".to_string(),
        ]
    );
    assert_eq!(
        harness.body("nyc_taxi_record/trip_1_2024-01-01_08-00-00.json"),
        json!({
            "VendorID": 1,
            "tpep_pickup_datetime": "2024-01-01 08:00:00",
            "passenger_count": 1,
            "fare_amount": 12.5,
        })
    );
    assert_eq!(
        harness.body("nyc_taxi_record/trip_2_2024-01-02_09-30-00.json"),
        json!({
            "VendorID": 2,
            "tpep_pickup_datetime": "2024-01-02 09:30:00",
            "passenger_count": 3,
            "fare_amount": 30.25,
        })
    );
    assert_eq!(harness.storage.created_buckets(), vec![TARGET.to_string()]);
    Ok(())
}

#[tokio::test]
async fn only_matching_objects_are_decoded() -> Result<()> {
    let bytes = parquet_bytes(two_trips());
    let harness = Harness::new(source_with(&[
        ("archive/jan.parquet", bytes.clone()),
        ("nyc_taxi_files/feb.csv", bytes.clone()),
        ("nyc_taxi_files/jan.parquet", bytes.clone()),
        ("nyc_taxi_files/readme.txt", bytes),
    ]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.listed, 4);
    assert_eq!(summary.matched, 1);
    assert_eq!(harness.tables.reads.load(Ordering::SeqCst), 1);
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::ObjectSkipped { object } if object == "archive/jan.parquet"
    )));
    Ok(())
}

#[tokio::test]
async fn no_matches_still_creates_target_and_warns() -> Result<()> {
    let harness = Harness::new(source_with(&[("other/data.parquet", Vec::new())]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.matched, 0);
    assert_eq!(harness.storage.created_buckets(), vec![TARGET.to_string()]);
    assert!(harness.storage.keys(TARGET).is_empty());
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::NoMatchingObjects { bucket, .. } if bucket == SOURCE
    )));
    assert!(harness.has_event(|event| matches!(event, RunEvent::RunFinished { .. })));
    Ok(())
}

#[tokio::test]
async fn existing_target_is_not_recreated() -> Result<()> {
    let storage = source_with(&[(
        "nyc_taxi_files/jan.parquet",
        parquet_bytes(two_trips()),
    )])
    .with_bucket(TARGET);
    let harness = Harness::new(storage);

    harness.relay.run().await?;

    assert!(harness.storage.created_buckets().is_empty());
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::TargetBucketExists { bucket } if bucket == TARGET
    )));
    Ok(())
}

#[tokio::test]
async fn missing_source_bucket_aborts_before_touching_target() {
    let harness = Harness::new(MemoryStorage::new());

    let err = harness.relay.run().await.unwrap_err();

    assert!(matches!(err, RelayError::SourceBucketMissing(ref bucket) if bucket == SOURCE));
    assert!(harness.storage.created_buckets().is_empty());
    assert!(harness.has_event(|event| matches!(event, RunEvent::RunAborted { .. })));
    assert!(!harness.has_event(|event| matches!(event, RunEvent::NoMatchingObjects { .. })));
}

#[tokio::test]
async fn rows_missing_key_fields_are_skipped_individually() -> Result<()> {
    let frame = df!(
        "VendorID" => [Some(1i32), None, Some(2)],
        "tpep_pickup_datetime" => [
            Some("2024-01-01 08:00:00"),
            Some("2024-01-01 08:05:00"),
            None,
        ],
    )?;
    let mut good = df!(
        "VendorID" => [4i32],
        "tpep_pickup_datetime" => ["2024-01-03 10:00:00"],
    )?;
    good.vstack_mut(&frame.slice(0, 1))?;

    let harness = Harness::new(source_with(&[
        ("nyc_taxi_files/a.parquet", parquet_bytes(frame)),
        ("nyc_taxi_files/b.parquet", parquet_bytes(good)),
    ]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.rows_failed, 2);
    assert_eq!(summary.rows_written, 3);
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::RowMissingField { object, index: 1, field: "VendorID" }
            if object == "nyc_taxi_files/a.parquet"
    )));
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::RowMissingField { index: 2, field: "tpep_pickup_datetime", .. }
    )));
    assert!(harness
        .storage
        .object(TARGET, "nyc_taxi_record/trip_4_2024-01-03_10-00-00.json")
        .is_some());
    Ok(())
}

#[tokio::test]
async fn table_without_key_columns_completes_with_no_output() -> Result<()> {
    let frame = df!("fare_amount" => [1.0f64, 2.0])?;
    let harness = Harness::new(source_with(&[(
        "nyc_taxi_files/odd.parquet",
        parquet_bytes(frame),
    )]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rows_failed, 2);
    assert!(harness.storage.keys(TARGET).is_empty());
    assert!(!harness.has_event(|event| matches!(event, RunEvent::NoMatchingObjects { .. })));
    Ok(())
}

#[tokio::test]
async fn empty_and_corrupt_objects_do_not_stop_the_run() -> Result<()> {
    let empty = df!(
        "VendorID" => Vec::<i32>::new(),
        "tpep_pickup_datetime" => Vec::<String>::new(),
    )?;
    let harness = Harness::new(source_with(&[
        ("nyc_taxi_files/a_empty.parquet", parquet_bytes(empty)),
        ("nyc_taxi_files/b_corrupt.parquet", b"not parquet at all".to_vec()),
        ("nyc_taxi_files/c_good.parquet", parquet_bytes(two_trips())),
    ]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.matched, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rows_written, 2);
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::TableEmpty { object } if object == "nyc_taxi_files/a_empty.parquet"
    )));
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::ObjectFailed { object, .. } if object == "nyc_taxi_files/b_corrupt.parquet"
    )));
    Ok(())
}

#[tokio::test]
async fn only_failed_objects_still_warn_about_no_matches() -> Result<()> {
    let harness = Harness::new(source_with(&[(
        "nyc_taxi_files/broken.parquet",
        b"PAR1".to_vec(),
    )]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.matched, 1);
    assert_eq!(summary.processed, 0);
    assert!(harness.has_event(|event| matches!(event, RunEvent::NoMatchingObjects { .. })));
    Ok(())
}

#[tokio::test]
async fn upload_failure_skips_only_that_row() -> Result<()> {
    let storage = source_with(&[("nyc_taxi_files/jan.parquet", parquet_bytes(two_trips()))]);
    storage.fail_puts_for("nyc_taxi_record/trip_1_2024-01-01_08-00-00.json");
    let harness = Harness::new(storage);

    let summary = harness.relay.run().await?;

    assert_eq!(summary.rows_failed, 1);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(
        harness.storage.keys(TARGET),
        vec!["nyc_taxi_record/trip_2_2024-01-02_09-30-00.json".to_string()]
    );
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::RowFailed { index: 0, error, .. } if error.contains("upload failed")
    )));
    Ok(())
}

#[tokio::test]
async fn colliding_rows_overwrite_each_other() -> Result<()> {
    let frame = df!(
        "VendorID" => [1i32, 1],
        "tpep_pickup_datetime" => ["2024-01-01 08:00:00", "2024-01-01 08:00:00"],
        "fare_amount" => [5.0f64, 7.5],
    )?;
    let harness = Harness::new(source_with(&[(
        "nyc_taxi_files/dupes.parquet",
        parquet_bytes(frame),
    )]));

    let summary = harness.relay.run().await?;

    assert_eq!(summary.rows_written, 2);
    assert_eq!(harness.storage.keys(TARGET).len(), 1);
    assert_eq!(
        harness.body("nyc_taxi_record/trip_1_2024-01-01_08-00-00.json")["fare_amount"],
        json!(7.5)
    );
    Ok(())
}

#[tokio::test]
async fn objects_are_processed_in_listing_order() -> Result<()> {
    let bytes = parquet_bytes(two_trips());
    let harness = Harness::new(source_with(&[
        ("nyc_taxi_files/b.parquet", bytes.clone()),
        ("nyc_taxi_files/a.parquet", bytes),
    ]));

    harness.relay.run().await?;

    let matched: Vec<String> = harness
        .reporter
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::ObjectMatched { object } => Some(object),
            _ => None,
        })
        .collect();
    assert_eq!(
        matched,
        vec![
            "nyc_taxi_files/a.parquet".to_string(),
            "nyc_taxi_files/b.parquet".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failed_presign_abandons_only_that_object() -> Result<()> {
    let bytes = parquet_bytes(two_trips());
    let storage = source_with(&[
        ("nyc_taxi_files/a.parquet", bytes.clone()),
        ("nyc_taxi_files/b.parquet", bytes),
    ]);
    storage.fail_presigns_for("nyc_taxi_files/a.parquet");
    let harness = Harness::new(storage);

    let summary = harness.relay.run().await?;

    assert_eq!(summary.matched, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(harness.tables.reads.load(Ordering::SeqCst), 1);
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::ObjectFailed { object, error }
            if object == "nyc_taxi_files/a.parquet" && error.contains("signing")
    )));
    Ok(())
}

#[tokio::test]
async fn unreachable_object_is_skipped_and_the_run_continues() -> Result<()> {
    let bytes = parquet_bytes(two_trips());
    let harness = Harness::new(source_with(&[
        ("nyc_taxi_files/a.parquet", bytes.clone()),
        ("nyc_taxi_files/b.parquet", bytes),
    ]));
    harness.tables.make_unreachable("nyc_taxi_files/a.parquet");

    let summary = harness.relay.run().await?;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::ObjectFailed { object, error }
            if object == "nyc_taxi_files/a.parquet" && error.contains("connection refused")
    )));
    assert!(harness.has_event(|event| matches!(
        event,
        RunEvent::TableRead { object, rows: 2 } if object == "nyc_taxi_files/b.parquet"
    )));
    Ok(())
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let bytes = parquet_bytes(two_trips());
    let storage = source_with(&[
        ("nyc_taxi_files/a.parquet", bytes.clone()),
        ("nyc_taxi_files/b.parquet", bytes),
    ]);
    storage.fail_listing_after(1);
    let harness = Harness::new(storage);

    let err = harness.relay.run().await.unwrap_err();

    assert!(matches!(err, RelayError::Storage(_)));
    assert!(harness.has_event(|event| matches!(event, RunEvent::RunAborted { .. })));
    assert!(!harness.has_event(|event| matches!(event, RunEvent::NoMatchingObjects { .. })));
    assert!(!harness.has_event(|event| matches!(event, RunEvent::RunFinished { .. })));
    // objects listed before the failure were already relayed
    assert_eq!(harness.storage.keys(TARGET).len(), 2);
    assert_eq!(harness.tables.reads.load(Ordering::SeqCst), 1);
}
