use std::fs;
use std::sync::Arc;

use fleet_engine::{
    CommitError, CommitReport, JsonFileRecordStore, RecordStore, StagingCommitter, StagingRecord,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn record(key: &str, artifacts: &[&str]) -> StagingRecord {
    StagingRecord {
        key: key.to_string(),
        title: key.to_uppercase(),
        tags: vec!["Action".to_string()],
        artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
        ..StagingRecord::default()
    }
}

#[test]
fn commit_publishes_only_records_with_artifacts() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonFileRecordStore::open(temp.path()).unwrap());
    let committer = StagingCommitter::new(store.clone());

    committer.begin_run().unwrap();
    committer.stage(&record("doom", &["http://img/doom.png"])).unwrap();
    committer.stage(&record("quake", &[])).unwrap();
    assert_eq!(committer.staged_count().unwrap(), 2);
    // Staged work is invisible to production readers.
    assert!(store.production_records().unwrap().is_empty());

    let report = committer.commit().unwrap();
    assert_eq!(
        report,
        CommitReport {
            published: 1,
            dropped: 1
        }
    );
    assert_eq!(store.staging_count().unwrap(), 0);

    let reopened = JsonFileRecordStore::open(temp.path()).unwrap();
    assert_eq!(
        reopened.production_records().unwrap(),
        vec![record("doom", &["http://img/doom.png"])]
    );
}

#[test]
fn empty_commit_leaves_previous_production() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonFileRecordStore::open(temp.path()).unwrap());
    store
        .replace_production(vec![record("doom", &["http://img/doom.png"])])
        .unwrap();

    let committer = StagingCommitter::new(store.clone());
    committer.begin_run().unwrap();
    committer.stage(&record("quake", &[])).unwrap();

    let err = committer.commit().unwrap_err();
    assert!(matches!(err, CommitError::NothingToPublish { staged: 1 }));
    assert_eq!(store.production_records().unwrap().len(), 1);
    assert_eq!(store.staging_count().unwrap(), 0);
}

#[test]
fn discard_drops_staging_only() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonFileRecordStore::open(temp.path()).unwrap());
    store
        .replace_production(vec![record("doom", &["http://img/doom.png"])])
        .unwrap();
    let committer = StagingCommitter::new(store.clone());
    committer.stage(&record("quake", &["http://img/quake.png"])).unwrap();

    committer.discard().unwrap();
    assert!(store.staging_records().unwrap().is_empty());
    assert_eq!(store.production_records().unwrap()[0].key, "doom");
}

#[test]
fn reopen_counts_leftover_staging_until_next_run() {
    let temp = TempDir::new().unwrap();
    {
        let store = JsonFileRecordStore::open(temp.path()).unwrap();
        store.insert_staging(&record("a", &[])).unwrap();
        store.insert_staging(&record("b", &[])).unwrap();
    }
    assert!(temp.path().join("staging.jsonl").is_file());

    let store = Arc::new(JsonFileRecordStore::open(temp.path()).unwrap());
    assert_eq!(store.staging_count().unwrap(), 2);

    StagingCommitter::new(store.clone()).begin_run().unwrap();
    assert_eq!(store.staging_count().unwrap(), 0);
    assert!(!temp.path().join("staging.jsonl").exists());
}

#[test]
fn production_snapshot_is_written_atomically() {
    let temp = TempDir::new().unwrap();
    let store = JsonFileRecordStore::open(temp.path()).unwrap();
    store
        .replace_production(vec![record("doom", &["http://img/doom.png"])])
        .unwrap();
    store
        .replace_production(vec![record("quake", &["http://img/quake.png"])])
        .unwrap();

    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["production.json"]);
    assert_eq!(store.production_records().unwrap()[0].key, "quake");
}
