//! Importer integration tests against a file-backed SQLite database
//!
//! Covers:
//! - Mixed blank, garbage and valid lines
//! - Idempotent re-runs
//! - Resuming from a checkpoint gives the same table as one full run
//! - Recovery after an aborted run
//! - Prefixed field keys and value typing

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use anyhow::Result;
use common::{authn_lines, init_tracing, write_log, TestDatabase};
use serde_json::json;
use stepup_authnlog::checkpoint::CheckpointStore;
use stepup_authnlog::extract::Field;
use stepup_authnlog::pipeline::{IngestOptions, IngestionStats, Pipeline, Position};
use stepup_authnlog::sink::MemorySink;
use stepup_authnlog::IngestError;
use stepup_common::Fingerprint;
use tracing::info;

#[tokio::test]
async fn test_mixed_lines_are_counted_and_valid_ones_stored() -> Result<()> {
    init_tracing();
    let db = TestDatabase::new()?;
    let lines = vec![
        String::new(),
        r#"prefix {"request_id":"a","datetime":"2020-01-01T00:00:00+00:00"}"#.to_string(),
        "garbage-no-json".to_string(),
        "{bad json".to_string(),
    ];
    let log = write_log(db.dir.path(), "authn.log", &lines);

    let mut pipeline = Pipeline::new(&log, db.sink().await?, CheckpointStore::disabled());
    let report = pipeline.run().await?;

    assert_eq!(
        report.stats,
        IngestionStats {
            lines_read: 4,
            lines_ignored: 1,
            parse_errors: 2,
            records_inserted: 1,
            records_existed: 0,
        }
    );

    let sink = pipeline.into_sink();
    assert_eq!(sink.count().await?, 1);
    let fingerprint =
        Fingerprint::of(&json!({"request_id": "a", "datetime": "2020-01-01T00:00:00+00:00"}));
    let stored = sink.fetch(&fingerprint).await?.expect("record stored under its fingerprint");
    assert_eq!(stored.get(Field::RequestId), Some("a"));
    assert_eq!(stored.get(Field::Datetime), Some("2020-01-01T00:00:00+00:00"));
    assert_eq!(stored.get(Field::Institution), None);

    Ok(())
}

#[tokio::test]
async fn test_rerun_is_idempotent() -> Result<()> {
    init_tracing();
    let db = TestDatabase::new()?;
    let lines = authn_lines(25);
    let log = write_log(db.dir.path(), "authn.log", &lines);

    let mut pipeline = Pipeline::new(&log, db.sink().await?, CheckpointStore::disabled());
    let first = pipeline.run().await?;
    let second = pipeline.run().await?;

    assert_eq!(first.stats.records_inserted, 25);
    assert_eq!(second.stats.records_inserted, 0);
    assert_eq!(second.stats.records_existed, 25);
    assert_eq!(pipeline.sink().count().await?, 25);

    Ok(())
}

#[tokio::test]
async fn test_rerun_leaves_stored_columns_unchanged() -> Result<()> {
    init_tracing();
    let db = TestDatabase::new()?;
    let lines = authn_lines(3);
    let log = write_log(db.dir.path(), "authn.log", &lines);
    let payload: serde_json::Value = serde_json::from_str(&lines[1][lines[1].find('{').unwrap()..])?;
    let fingerprint = Fingerprint::of(&payload);

    let mut pipeline = Pipeline::new(&log, db.sink().await?, CheckpointStore::disabled());
    pipeline.run().await?;
    let before = pipeline.sink().fetch(&fingerprint).await?.expect("record stored");

    let report = pipeline.run().await?;
    let after = pipeline.sink().fetch(&fingerprint).await?.expect("record still stored");

    assert_eq!(report.stats.records_existed, 3);
    assert_eq!(before, after);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_lines_count_as_existed() -> Result<()> {
    init_tracing();
    let db = TestDatabase::new()?;
    let lines = authn_lines(3);
    let doubled: Vec<String> = lines.iter().chain(lines.iter()).cloned().collect();
    let log = write_log(db.dir.path(), "authn.log", &doubled);

    let mut pipeline = Pipeline::new(&log, db.sink().await?, CheckpointStore::disabled());
    let report = pipeline.run().await?;

    assert_eq!(report.stats.records_inserted, 3);
    assert_eq!(report.stats.records_existed, 3);
    assert_eq!(pipeline.sink().count().await?, 3);

    Ok(())
}

#[tokio::test]
async fn test_resumed_runs_match_single_run() -> Result<()> {
    init_tracing();
    let lines = authn_lines(40);

    let full_db = TestDatabase::new()?;
    let full_log = write_log(full_db.dir.path(), "authn.log", &lines);
    let mut full = Pipeline::new(&full_log, full_db.sink().await?, CheckpointStore::disabled());
    full.run().await?;

    let split_db = TestDatabase::new()?;
    let split_log = write_log(split_db.dir.path(), "authn.log", &lines);
    let store = CheckpointStore::at(split_db.dir.path().join("authnlog.stat"));
    let mut split = Pipeline::new(&split_log, split_db.sink().await?, store.clone())
        .with_options(IngestOptions {
            checkpoint_interval: 5,
            max_lines: Some(17),
        });

    let mut runs = 0;
    let mut lines_read = 0;
    loop {
        let report = split.run().await?;
        runs += 1;
        lines_read += report.stats.lines_read;
        info!(run = runs, position = ?report.position, "Partial run finished");
        if report.stats.lines_read == 0 {
            break;
        }
        // a resumed run never re-reads a processed line
        assert_eq!(report.stats.records_existed, 0);
    }

    assert_eq!(lines_read, 40);
    assert_eq!(runs, 4);

    let full_sink = full.into_sink();
    let split_sink = split.into_sink();
    assert_eq!(full_sink.count().await?, split_sink.count().await?);
    for line in &lines {
        let json_start = line.find('{').unwrap();
        let payload: serde_json::Value = serde_json::from_str(&line[json_start..])?;
        let fingerprint = Fingerprint::of(&payload);
        assert_eq!(
            full_sink.fetch(&fingerprint).await?,
            split_sink.fetch(&fingerprint).await?
        );
    }

    let checkpoint = store.load(&split_log.to_string_lossy()).await.unwrap();
    assert_eq!(checkpoint.line, 40);
    assert_eq!(checkpoint.pos, std::fs::metadata(&split_log)?.len());

    Ok(())
}

#[tokio::test]
async fn test_aborted_run_resumes_at_failed_line() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let lines = authn_lines(10);
    let log = write_log(dir.path(), "authn.log", &lines);
    let store = CheckpointStore::at(dir.path().join("authnlog.stat"));

    let mut pipeline = Pipeline::new(&log, MemorySink::failing_at(4), store.clone());
    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.stats().map(|s| s.records_inserted), Some(3));
    match &err {
        IngestError::Aborted { report, .. } => {
            let third_line_end = lines[..3].iter().map(|l| l.len() as u64 + 1).sum();
            assert_eq!(report.position, Position { line: 3, offset: third_line_end });
        },
        other => panic!("expected an aborted run, got {other:?}"),
    }

    let mut sink = pipeline.into_sink();
    sink.heal();
    let mut pipeline = Pipeline::new(&log, sink, store);
    let report = pipeline.run().await?;

    assert_eq!(report.stats.lines_read, 7);
    assert_eq!(report.stats.records_inserted, 7);
    assert_eq!(pipeline.sink().len(), 10);

    Ok(())
}

#[tokio::test]
async fn test_checkpoint_for_another_file_is_ignored() -> Result<()> {
    init_tracing();
    let db = TestDatabase::new()?;
    let lines = authn_lines(6);
    let first = write_log(db.dir.path(), "authn.log", &lines);
    let rotated = write_log(db.dir.path(), "authn.log.1", &lines);
    let store = CheckpointStore::at(db.dir.path().join("authnlog.stat"));

    let mut pipeline = Pipeline::new(&first, db.sink().await?, store.clone());
    pipeline.run().await?;

    let mut pipeline = Pipeline::new(&rotated, pipeline.into_sink(), store.clone());
    let report = pipeline.run().await?;

    assert_eq!(report.stats.lines_read, 6);
    assert_eq!(report.stats.records_existed, 6);
    let checkpoint = store.read().await.unwrap();
    assert_eq!(checkpoint.file, rotated.to_string_lossy());

    Ok(())
}

#[tokio::test]
async fn test_prefixed_keys_and_value_types() -> Result<()> {
    init_tracing();
    let db = TestDatabase::new()?;
    let line = r#"[2016-01-01 00:00:00] app.NOTICE: {"_request_id":"r-1","_ctxt_second_factor_id":"sf-1","_ctxt_resulting_loa":3,"_ctxt_authentication_result":true,"_ctxt_institution":null,"requesting_sp":{"id":"sp"}}"#;
    let log = write_log(db.dir.path(), "authn.log", &[line.to_string()]);

    let mut pipeline = Pipeline::new(&log, db.sink().await?, CheckpointStore::disabled());
    pipeline.run().await?;

    let payload: serde_json::Value = serde_json::from_str(&line[line.find('{').unwrap()..])?;
    let stored = pipeline
        .sink()
        .fetch(&Fingerprint::of(&payload))
        .await?
        .expect("record stored");

    assert_eq!(stored.get(Field::RequestId), Some("r-1"));
    assert_eq!(stored.get(Field::SecondFactorId), Some("sf-1"));
    assert_eq!(stored.get(Field::ResultingLoa), Some("3"));
    assert_eq!(stored.get(Field::AuthenticationResult), Some("true"));
    assert_eq!(stored.get(Field::Institution), None);
    assert_eq!(stored.get(Field::RequestingSp), Some(r#"{"id":"sp"}"#));

    Ok(())
}
