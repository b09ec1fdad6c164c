//! End-to-end tests of the cache namespaces on the embedded backend.
//!
//! Covers:
//! - The four reference scenarios (URL hit, function memoization, ID
//!   mapping, prune with nothing to prune)
//! - TTL boundaries for the URL, image and function caches
//! - Idempotent upserts across namespaces
//! - Reopening a cache keeps durable data

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use mediacache::{CacheConfig, Clock, ImageKey, ImageSet, ManualClock, MediaCache, MemorySettings};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_case::test_case;

const T0: i64 = 1_700_000_000;
const HOUR: u64 = 3600;

fn open_at(dir: &TempDir, clock: &Arc<ManualClock>) -> MediaCache {
    MediaCache::builder(CacheConfig::new(dir.path()))
        .settings(Arc::new(MemorySettings::new()))
        .clock(Arc::clone(clock) as Arc<dyn Clock>)
        .open()
        .unwrap()
}

fn html_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("content-type".to_string(), "text/html".to_string())])
}

// ============================================================================
// Reference scenarios
// ============================================================================

#[test]
fn scenario_a_url_hit_within_same_second() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);

    cache
        .urls()
        .set("http://x", b"<html>ok</html>", "", &html_headers())
        .unwrap();
    let response = cache
        .urls()
        .get("http://x", "", Duration::from_secs(8 * HOUR))
        .unwrap();

    assert_eq!(response.body, b"<html>ok</html>");
    assert!(!response.headers.is_empty());
}

#[test]
fn scenario_b_function_cache_hit_and_miss() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);
    let ttl = Duration::from_secs(HOUR);

    cache
        .functions()
        .set("resolve", &["a"], &json!({}), &json!({"v": 1}))
        .unwrap();

    let hit: (bool, Option<serde_json::Value>) = cache
        .functions()
        .get("resolve", &["a"], &json!({}), ttl)
        .unwrap();
    assert_eq!(hit, (true, Some(json!({"v": 1}))));

    let miss: (bool, Option<serde_json::Value>) = cache
        .functions()
        .get("resolve", &["b"], &json!({}), ttl)
        .unwrap();
    assert_eq!(miss, (false, None));
}

#[test]
fn scenario_c_id_mapping() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);

    cache.ids().set("100", "200").unwrap();
    assert_eq!(cache.ids().get("100").unwrap().as_deref(), Some("200"));
    assert_eq!(cache.ids().get("999").unwrap(), None);
}

#[test]
fn scenario_d_prune_with_only_recent_rows() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);

    cache.urls().set("http://recent", b"x", "", &html_headers()).unwrap();
    clock.advance(24 * 3600);

    assert_eq!(cache.urls().prune(Duration::from_secs(31 * 24 * HOUR)).unwrap(), None);
    assert!(!cache
        .urls()
        .get("http://recent", "", Duration::from_secs(48 * HOUR))
        .unwrap()
        .is_empty());
}

// ============================================================================
// TTL boundaries
// ============================================================================

#[test_case(-1, true ; "one second before expiry")]
#[test_case(0, true ; "exactly at expiry")]
#[test_case(1, false ; "one second after expiry")]
fn url_ttl_boundary(offset: i64, hit: bool) {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);
    let ttl = Duration::from_secs(600);

    cache.urls().set("http://t", b"body", "", &html_headers()).unwrap();
    clock.set(T0 + 600 + offset);
    assert_eq!(!cache.urls().get("http://t", "", ttl).unwrap().is_empty(), hit);
}

#[test_case(-1, true ; "one second before expiry")]
#[test_case(1, false ; "one second after expiry")]
fn image_ttl_boundary(offset: i64, hit: bool) {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);
    let key = ImageKey::new("movie", "603");
    let images = ImageSet {
        poster: Some("https://img/poster.jpg".to_string()),
        ..ImageSet::default()
    };

    cache.images().set(&key, &images).unwrap();
    clock.set(T0 + 3600 + offset);
    let found = cache.images().get(&key, Duration::from_secs(3600)).unwrap();
    assert_eq!(found.is_some(), hit);
}

#[test_case(-1, true ; "one second before expiry")]
#[test_case(1, false ; "one second after expiry")]
fn function_ttl_boundary(offset: i64, hit: bool) {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);

    cache.functions().set("f", &[1], &(), &"r").unwrap();
    clock.set(T0 + 60 + offset);
    let (found, _): (bool, Option<String>) = cache
        .functions()
        .get("f", &[1], &(), Duration::from_secs(60))
        .unwrap();
    assert_eq!(found, hit);
}

// ============================================================================
// Idempotence and persistence
// ============================================================================

#[test]
fn repeated_upserts_keep_one_row() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = open_at(&dir, &clock);

    for _ in 0..3 {
        cache.urls().set("http://same", b"b", "", &html_headers()).unwrap();
        cache.ids().set("tt1", "1").unwrap();
        cache.bookmarks().set("movie", "1", "One", None).unwrap();
        cache.genres().set("movie", "28", "Action").unwrap();
        cache.saved_searches().add("movie", "alien").unwrap();
    }

    let stats: BTreeMap<&str, u64> = cache.stats().unwrap().into_iter().collect();
    assert_eq!(stats["url_cache"], 1);
    assert_eq!(stats["id_mapping"], 1);
    assert_eq!(stats["bookmarks"], 1);
    assert_eq!(stats["genre_cache"], 1);
    assert_eq!(stats["saved_searches"], 1);
}

#[test]
fn reopen_keeps_data() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    {
        let cache = open_at(&dir, &clock);
        cache.bookmarks().set("tvshow", "1399", "Game of Thrones", None).unwrap();
        cache.close();
    }

    let cache = open_at(&dir, &clock);
    let bookmark = cache.bookmarks().get("tvshow", "1399").unwrap().unwrap();
    assert_eq!(bookmark.title, "Game of Thrones");
}

#[test]
fn namespaces_are_usable_from_many_threads() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let cache = Arc::new(open_at(&dir, &clock));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..25 {
                    cache.ids().set(&format!("t{t}-{i}"), &i.to_string()).unwrap();
                    assert_eq!(
                        cache.ids().get(&format!("t{t}-{i}")).unwrap(),
                        Some(i.to_string())
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats: BTreeMap<&str, u64> = cache.stats().unwrap().into_iter().collect();
    assert_eq!(stats["id_mapping"], 200);
}
