//! Schema migration, snapshot and reset tests.
//!
//! Covers:
//! - Snapshot export/import preserves awkward text (delimiters, newlines,
//!   non-ASCII, backslashes) in every durable table and keeps `NULL`
//!   distinct from empty strings
//! - A recorded version mismatch migrates on open and keeps durable rows
//! - Reset while another handle is checked out

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use mediacache::migration::snapshot::{SnapshotFile, SnapshotRecord, SnapshotWriter};
use mediacache::storage::{ColumnType, Value};
use mediacache::{
    CacheConfig, ImageKey, ImageSet, MediaCache, MemorySettings, MigrationOutcome, RelatedUrlKey,
    SCHEMA_VERSION,
};
use mediacache::sql_params;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open(dir: &TempDir) -> MediaCache {
    MediaCache::builder(CacheConfig::new(dir.path()))
        .settings(Arc::new(MemorySettings::new()))
        .open()
        .unwrap()
}

const AWKWARD: &[&str] = &[
    "tab\tinside",
    "line\nbreak",
    "carriage\r\nreturn",
    "quote \" and 'single'",
    "日本語のタイトル",
    "Amélie",
    "\\N",
    "\\x41",
    "\\leading backslash",
    "[bookmarks]",
    "",
];

#[test]
fn snapshot_round_trip_preserves_text_and_nulls() {
    let source_dir = TempDir::new().unwrap();
    let source = open(&source_dir);

    for (i, text) in AWKWARD.iter().enumerate() {
        let url = if i % 2 == 0 { None } else { Some(*text) };
        source
            .bookmarks()
            .set("movie", &format!("id-{i}"), text, url)
            .unwrap();
        source
            .other_lists()
            .set("watch_later", &format!("id-{i}"), Some(text))
            .unwrap();
    }
    source.saved_searches().add("movie", "tab\tquery").unwrap();

    for (i, text) in AWKWARD.iter().enumerate() {
        let images = ImageSet {
            poster: Some((*text).to_string()),
            fanart: Some(String::new()),
            ..ImageSet::default()
        };
        source.images().set(&image_key(i), &images).unwrap();
        source
            .related()
            .set(&RelatedUrlKey::movie(*text, 1999, "site"), text)
            .unwrap();
        source.ids().set(&format!("src-{i}"), text).unwrap();
        source.genres().set("movie", &format!("g-{i}"), text).unwrap();
    }

    let snapshot = source_dir.path().join("export.txt");
    let exported = source.migrator().export_snapshot(&snapshot).unwrap();
    assert_eq!(exported, AWKWARD.len() * 6 + 1);

    let target_dir = TempDir::new().unwrap();
    let target = open(&target_dir);
    assert_eq!(target.migrator().import_snapshot(&snapshot).unwrap(), exported);

    for (i, text) in AWKWARD.iter().enumerate() {
        let bookmark = target.bookmarks().get("movie", &format!("id-{i}")).unwrap().unwrap();
        assert_eq!(bookmark.title, *text);
        if i % 2 == 0 {
            assert_eq!(bookmark.url, None);
        } else {
            assert_eq!(bookmark.url.as_deref(), Some(*text));
        }
    }
    let entries = target.other_lists().list("watch_later").unwrap();
    assert_eq!(entries.len(), AWKWARD.len());
    for entry in entries {
        let i: usize = entry.item_id.trim_start_matches("id-").parse().unwrap();
        assert_eq!(entry.payload.as_deref(), Some(AWKWARD[i]));
    }
    assert_eq!(target.saved_searches().list("movie").unwrap()[0].query, "tab\tquery");

    for (i, text) in AWKWARD.iter().enumerate() {
        let images = target
            .images()
            .get(&image_key(i), Duration::from_secs(3600))
            .unwrap()
            .unwrap();
        let expected = ImageSet {
            poster: Some((*text).to_string()).filter(|t| !t.is_empty()),
            ..ImageSet::default()
        };
        assert_eq!(images, expected, "image row {i}");
        assert_eq!(
            target
                .related()
                .get(&RelatedUrlKey::movie(*text, 1999, "site"))
                .unwrap()
                .as_deref(),
            Some(*text)
        );
        assert_eq!(target.ids().get(&format!("src-{i}")).unwrap().as_deref(), Some(*text));
        assert_eq!(
            target.genres().get("movie", &format!("g-{i}")).unwrap().as_deref(),
            Some(*text)
        );
    }
}

fn image_key(i: usize) -> ImageKey {
    ImageKey::new("episode", format!("img-{i}")).with_episode(1, i64::try_from(i).unwrap())
}

#[test]
fn version_mismatch_migrates_on_open() {
    let dir = TempDir::new().unwrap();
    {
        let cache = open(&dir);
        cache.bookmarks().set("movie", "603", "The Matrix", None).unwrap();
        cache.genres().set("movie", "28", "Action").unwrap();
        cache
            .urls()
            .set("http://volatile", b"x", "", &Default::default())
            .unwrap();

        let exec = cache.executor();
        let stale = exec.prepare("test.stale_version", "UPDATE cache_version SET version = ?");
        exec.execute(&stale, &sql_params!["0.0.1"]).unwrap();
        cache.close();
    }

    let (cache, outcome) = MediaCache::builder(CacheConfig::new(dir.path()))
        .settings(Arc::new(MemorySettings::new()))
        .open_with_outcome()
        .unwrap();

    assert_eq!(
        outcome,
        MigrationOutcome::Migrated {
            from: Some("0.0.1".to_string()),
            rows: 2
        }
    );
    assert_eq!(cache.migrator().recorded_version().unwrap().as_deref(), Some(SCHEMA_VERSION));
    assert!(cache.bookmarks().get("movie", "603").unwrap().is_some());
    assert_eq!(cache.genres().get("movie", "28").unwrap().as_deref(), Some("Action"));
    assert!(cache
        .urls()
        .get("http://volatile", "", Duration::from_secs(3600))
        .unwrap()
        .is_empty());
}

#[test]
fn unknown_version_with_tables_migrates() {
    let dir = TempDir::new().unwrap();
    {
        let cache = open(&dir);
        cache.ids().set("tt1", "1").unwrap();
        let exec = cache.executor();
        exec.execute(&exec.prepare("test.drop", "DROP TABLE cache_version"), &[])
            .unwrap();
        cache.close();
    }

    let (cache, outcome) = MediaCache::builder(CacheConfig::new(dir.path()))
        .settings(Arc::new(MemorySettings::new()))
        .open_with_outcome()
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated { from: None, rows: 1 });
    assert_eq!(cache.ids().get("tt1").unwrap().as_deref(), Some("1"));
}

#[test]
fn reset_with_stale_handle() {
    let dir = TempDir::new().unwrap();
    let cache = open(&dir);
    cache.bookmarks().set("movie", "old", "Before reset", None).unwrap();

    let pool = Arc::clone(cache.executor().pool());
    let stale = pool.checkout().unwrap();
    cache.reset().unwrap();
    drop(stale);

    cache.bookmarks().set("movie", "new", "After reset", None).unwrap();
    assert!(cache.bookmarks().get("movie", "old").unwrap().is_none());
    cache.close();

    let reopened = open(&dir);
    assert!(reopened.bookmarks().get("movie", "new").unwrap().is_some());
    assert!(reopened.bookmarks().get("movie", "old").unwrap().is_none());
}

proptest! {
    /// Property: any text field survives a snapshot write and read.
    #[test]
    fn prop_snapshot_field_survives(text in any::<String>(), nullable in any::<bool>()) {
        let value = if nullable { Value::Null } else { Value::Text(text) };

        let mut buf = Vec::new();
        let mut writer = SnapshotWriter::new(&mut buf, SCHEMA_VERSION).unwrap();
        writer.begin_table("other_lists", &["list_name", "payload"]).unwrap();
        writer.write_row(&[Value::from("l"), value.clone()]).unwrap();
        writer.finish().unwrap();

        let file = SnapshotFile::parse(String::from_utf8(buf).unwrap()).unwrap();
        let last = file.records().last().unwrap().unwrap().2;
        let SnapshotRecord::Fields(fields) = last else {
            panic!("expected a data row");
        };
        let decoded = mediacache::migration::snapshot::decode_field(&fields[1], ColumnType::Text).unwrap();
        prop_assert_eq!(decoded, value);
    }
}
