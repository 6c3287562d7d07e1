//! Integration tests for the key/value cache store
//!
//! Covers the store contracts on a real filesystem: round-trips through every
//! built-in serializer, duplicate-key policies, deletion atomicity and
//! read-only stores.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use memento_cache::{
    Backend, CacheStore, Column, ColumnData, Dataset, Error, LocalBackend, MemoryBackend, OnExists,
    Options, PutOptions, Registry, Result, Table, Value,
};
use ndarray::{ArrayD, IxDyn};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn sample_table() -> Table {
    Table::new(vec![
        Column::new("foo", ColumnData::Int(vec![1, 2, 3])),
        Column::new("bar", ColumnData::Float(vec![0.5, 1.5, 2.5])),
    ])
    .unwrap()
}

fn sample_dataset(scale: f64) -> Dataset {
    let data = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![scale, scale * 2.0, 0.0, -1.0]).unwrap();
    Dataset::new()
        .with_variable("x", ["lat", "lon"], data)
        .unwrap()
        .with_attr("scale", json!(scale))
}

// ==========================================================================
// Scenarios
// ==========================================================================

#[test]
fn put_then_get_generic_string() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path());

    store
        .put(
            "bar",
            &Value::from("my_data"),
            PutOptions::default().serializer("generic"),
        )
        .unwrap();

    assert_eq!(store.get("bar", &Options::new()).unwrap(), Value::from("my_data"));
    assert!(tmp.path().join("bar").is_file());
    assert!(tmp.path().join("bar.artifact.json").is_file());
}

#[test]
fn readonly_store_serves_existing_keys() {
    let tmp = TempDir::new().unwrap();
    CacheStore::open(tmp.path())
        .put("seeded", &Value::from(json!({"a": 1})), PutOptions::default())
        .unwrap();

    let store = CacheStore::open(tmp.path()).readonly(true);
    assert!(matches!(
        store.put("other", &Value::from("x"), PutOptions::default()),
        Err(Error::ReadOnlyStore { .. })
    ));
    assert!(matches!(
        store.delete("seeded", false),
        Err(Error::ReadOnlyStore { .. })
    ));
    assert_eq!(
        store.get("seeded", &Options::new()).unwrap(),
        Value::from(json!({"a": 1}))
    );
}

// ==========================================================================
// Round-trips
// ==========================================================================

#[test]
fn every_builtin_serializer_round_trips() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path());

    let cases = [
        ("generic", "obj.bin", Value::from(json!({"nested": [1, 2, {"k": null}]}))),
        ("generic", "table.bin", Value::Table(sample_table())),
        ("json", "obj.json", Value::from(json!([1, 3, 4]))),
        ("table.csv", "foo.csv", Value::Table(sample_table())),
        ("table.arrow", "foo.arrow", Value::Table(sample_table())),
        ("dataset.file", "ds.dataset", Value::Dataset(sample_dataset(1.0))),
        ("dataset.tree", "ds.dstree", Value::Dataset(sample_dataset(2.0))),
    ];

    for (serializer, key, value) in cases {
        let artifact = store
            .put(key, &value, PutOptions::default().serializer(serializer))
            .unwrap()
            .unwrap();
        assert_eq!(artifact.serializer, serializer);
        assert_eq!(store.get(key, &Options::new()).unwrap(), value, "{serializer}");
    }
    assert!(store.is_tree("ds.dstree"));
    assert_eq!(store.keys().unwrap().len(), 7);
}

#[test]
fn auto_serializer_follows_rules() {
    let store = CacheStore::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(Registry::with_builtins()),
    );

    let ds = store
        .put("ds", &Value::Dataset(sample_dataset(1.0)), PutOptions::default().serializer("auto"))
        .unwrap()
        .unwrap();
    assert_eq!(ds.serializer, "dataset.file");

    let table = store
        .put("t", &Value::Table(sample_table()), PutOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(table.serializer, "table.csv");

    let other = store
        .put("o", &Value::from("my_data"), PutOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(other.serializer, "generic");
}

#[test]
fn artifact_records_options_and_metadata() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path());
    let mut dump = Options::new();
    dump.insert("delimiter".into(), json!(";"));

    store
        .put(
            "semi.csv",
            &Value::Table(sample_table()),
            PutOptions::default()
                .serializer("table.csv")
                .dump_options(dump.clone())
                .metadata([("source".to_string(), json!("unit"))].into()),
        )
        .unwrap();

    let artifact = store.get_artifact("semi.csv").unwrap();
    assert_eq!(artifact.dump_options["delimiter"], json!(";"));
    assert_eq!(
        artifact.dump_options["columns"],
        json!([["foo", "int"], ["bar", "float"]])
    );
    assert_eq!(artifact.metadata["source"], json!("unit"));
    assert!(artifact.fingerprint.is_none());

    let raw = std::fs::read_to_string(tmp.path().join("semi.csv")).unwrap();
    assert!(raw.starts_with("foo;bar"));
    // Recorded dump options are reused on load
    assert_eq!(
        store.get("semi.csv", &Options::new()).unwrap(),
        Value::Table(sample_table())
    );
}

#[test]
fn default_table_encoding_keeps_column_types() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path());
    let cases = [
        (
            "zips",
            Table::new(vec![Column::new(
                "zip",
                ColumnData::Text(vec!["01234".into(), "2".into()]),
            )])
            .unwrap(),
        ),
        (
            "flags",
            Table::new(vec![Column::new(
                "flag",
                ColumnData::Text(vec!["true".into(), "false".into()]),
            )])
            .unwrap(),
        ),
        (
            "empty",
            Table::new(vec![
                Column::new("n", ColumnData::Int(vec![])),
                Column::new("x", ColumnData::Float(vec![])),
            ])
            .unwrap(),
        ),
    ];

    for (key, table) in cases {
        let value = Value::Table(table);
        let artifact = store.put(key, &value, PutOptions::default()).unwrap().unwrap();
        assert_eq!(artifact.serializer, "table.csv");
        assert_eq!(store.get(key, &Options::new()).unwrap(), value, "{key}");
    }
}

// ==========================================================================
// Duplicate-key policies
// ==========================================================================

#[test]
fn duplicate_key_policies_on_disk() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path());
    let original = Value::Dataset(sample_dataset(1.0));
    let replacement = Value::Dataset(sample_dataset(5.0));
    let tree = PutOptions::default().serializer("dataset.tree");

    store.put("ds", &original, tree.clone()).unwrap();

    assert!(matches!(
        store.put("ds", &replacement, tree.clone()),
        Err(Error::DuplicateKey { .. })
    ));
    assert_eq!(store.get("ds", &Options::new()).unwrap(), original);

    assert!(
        store
            .put("ds", &replacement, tree.clone().on_exists(OnExists::Skip))
            .unwrap()
            .is_none()
    );
    assert_eq!(store.get("ds", &Options::new()).unwrap(), original);

    // Overwrite may switch encodings; the old tree must be gone
    store
        .put(
            "ds",
            &replacement,
            PutOptions::default()
                .serializer("dataset.file")
                .on_exists(OnExists::Overwrite),
        )
        .unwrap();
    assert!(tmp.path().join("ds").is_file());
    assert_eq!(store.get("ds", &Options::new()).unwrap(), replacement);
}

// ==========================================================================
// Deletion
// ==========================================================================

#[test]
fn delete_removes_value_and_metadata() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path());
    store
        .put(
            "ds.dstree",
            &Value::Dataset(sample_dataset(3.0)),
            PutOptions::default().serializer("dataset.tree"),
        )
        .unwrap();

    store.delete("ds.dstree", true).unwrap();
    assert!(store.contains("ds.dstree"));
    assert!(tmp.path().join("ds.dstree").is_dir());

    store.delete("ds.dstree", false).unwrap();
    assert!(!store.contains("ds.dstree"));
    assert!(!tmp.path().join("ds.dstree").exists());
    assert!(!tmp.path().join("ds.dstree.artifact.json").exists());
    assert!(store.delete("ds.dstree", false).unwrap_err().is_not_found());
}

/// Memory backend whose value deletions can be made to fail
#[derive(Debug, Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_value_delete: AtomicBool,
}

impl FlakyBackend {
    fn refuse(&self, path: &str) -> Result<()> {
        if self.fail_value_delete.load(Ordering::SeqCst) && !path.ends_with(".artifact.json") {
            return Err(Error::io(
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "refused"),
                path,
                "remove_file",
            ));
        }
        Ok(())
    }
}

impl Backend for FlakyBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path)
    }
    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.inner.write(path, data)
    }
    fn delete(&self, path: &str) -> Result<()> {
        self.refuse(path)?;
        self.inner.delete(path)
    }
    fn delete_tree(&self, path: &str) -> Result<()> {
        self.refuse(path)?;
        self.inner.delete_tree(path)
    }
    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }
    fn is_dir(&self, path: &str) -> bool {
        self.inner.is_dir(path)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }
    fn create_dir_all(&self, path: &str) -> Result<()> {
        self.inner.create_dir_all(path)
    }
    fn describe(&self, path: &str) -> String {
        self.inner.describe(path)
    }
}

#[test]
fn failed_value_removal_keeps_entry_committed() {
    let backend = Arc::new(FlakyBackend::default());
    let store = CacheStore::new(backend.clone(), Arc::new(Registry::with_builtins()));
    store
        .put("k", &Value::from("kept"), PutOptions::default())
        .unwrap();

    backend.fail_value_delete.store(true, Ordering::SeqCst);
    assert!(matches!(store.delete("k", false), Err(Error::Io { .. })));
    assert!(store.contains("k"));
    assert_eq!(store.get("k", &Options::new()).unwrap(), Value::from("kept"));

    backend.fail_value_delete.store(false, Ordering::SeqCst);
    store.delete("k", false).unwrap();
    assert!(!store.contains("k"));
}

// ==========================================================================
// Keys and concurrency
// ==========================================================================

#[test]
fn invalid_keys_are_rejected_before_io() {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::open(tmp.path().join("root"));
    for key in ["", "/etc/passwd", "../escape", "x.artifact.json"] {
        assert!(matches!(
            store.put(key, &Value::from("x"), PutOptions::default()),
            Err(Error::InvalidKey { .. })
        ));
        assert!(!store.contains(key));
    }
    assert!(!tmp.path().join("root").exists());
}

#[test]
fn concurrent_puts_on_one_key_commit_once() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(CacheStore::new(
        Arc::new(LocalBackend::new(tmp.path())),
        Arc::new(Registry::with_builtins()),
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                store
                    .put("shared", &Value::from(json!(i)), PutOptions::default())
                    .map(|artifact| artifact.is_some())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let committed = results.iter().filter(|r| matches!(r, Ok(true))).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(Error::DuplicateKey { .. })))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(duplicates, 7);
}
