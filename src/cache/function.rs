//! Memoized function results.
//!
//! A call is identified by its function name and arguments. The key stored
//! in the table is the SHA-256 of one canonical JSON encoding of the whole
//! `(name, args, kwargs)` triple; JSON objects serialize with sorted keys, so
//! keyword order does not change the key. The name is also stored in clear
//! so a single function's results can be flushed.

use super::CacheStore;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Statement, TableDef};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Largest serialized result that is stored (16 MiB - 1).
///
/// Larger results are skipped silently, on every backend.
pub const MAX_RESULT_BYTES: usize = 16 * 1024 * 1024 - 1;

pub(crate) const TABLE: TableDef = TableDef {
    name: "function_cache",
    columns: &[
        Column::required("name", ColumnType::Key(255)),
        Column::required("key_hash", ColumnType::Key(64)),
        Column::required("result", ColumnType::Blob),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["name", "key_hash"],
    indexes: &["created_at"],
    durable: false,
};

/// Computes the cache key for a call.
///
/// # Errors
///
/// Returns an error if the arguments cannot be serialized to JSON.
pub fn call_key<A, K>(name: &str, args: &A, kwargs: &K) -> Result<String>
where
    A: Serialize + ?Sized,
    K: Serialize + ?Sized,
{
    let canonical = serde_json::to_value((name, args, kwargs))
        .and_then(|v| serde_json::to_vec(&v))
        .map_err(|e| Error::failed("encode_function_key", e))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Memoized function results.
pub struct FunctionCache {
    store: Arc<CacheStore>,
    upsert: Statement,
    select: Statement,
    flush_all: Statement,
    flush_name: Statement,
}

impl FunctionCache {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("function_cache.set", &TABLE),
            select: exec.prepare(
                "function_cache.get",
                "SELECT result, created_at FROM function_cache WHERE name = ? AND key_hash = ?",
            ),
            flush_all: exec.prepare("function_cache.flush", "DELETE FROM function_cache"),
            flush_name: exec.prepare(
                "function_cache.flush",
                "DELETE FROM function_cache WHERE name = ?",
            ),
            store,
        }
    }

    /// Stores the result of a call.
    ///
    /// Returns `false` without writing when the serialized result exceeds
    /// [`MAX_RESULT_BYTES`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    #[instrument(skip_all, fields(operation = "function_cache.set", name = %name))]
    pub fn set<A, K, R>(&self, name: &str, args: &A, kwargs: &K, result: &R) -> Result<bool>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        R: Serialize + ?Sized,
    {
        let key = call_key(name, args, kwargs)?;
        let payload =
            serde_json::to_vec(result).map_err(|e| Error::failed("encode_function_result", e))?;
        if payload.len() > MAX_RESULT_BYTES {
            tracing::debug!(bytes = payload.len(), "Result too large to cache");
            return Ok(false);
        }

        let stored_name = self.store.bound(&TABLE, "name", name);
        self.store.run("function_cache.set", || {
            let now = self.store.now();
            self.store.executor().execute(
                &self.upsert,
                &sql_params![&*stored_name, key.as_str(), payload.as_slice(), now],
            )
        })?;
        Ok(true)
    }

    /// Looks up the result of a call stored at most `ttl` ago.
    ///
    /// Returns `(false, None)` on a miss, an expired entry, or a stored
    /// result that no longer deserializes as `R`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be computed or the read fails.
    #[instrument(skip_all, fields(operation = "function_cache.get", name = %name))]
    pub fn get<A, K, R>(
        &self,
        name: &str,
        args: &A,
        kwargs: &K,
        ttl: Duration,
    ) -> Result<(bool, Option<R>)>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let key = call_key(name, args, kwargs)?;
        let stored_name = self.store.bound(&TABLE, "name", name);
        let rows = self.store.run("function_cache.get", || {
            self.store
                .executor()
                .query(&self.select, &sql_params![&*stored_name, key.as_str()])
        })?;

        let Some(row) = rows.into_iter().next() else {
            return Ok((false, None));
        };
        let created_at = row.integer(1).unwrap_or(0);
        if self.store.now() - created_at > i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX) {
            return Ok((false, None));
        }

        let payload = row.blob(0).unwrap_or_default();
        match serde_json::from_slice(&payload) {
            Ok(value) => Ok((true, Some(value))),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring cached result of a different shape");
                Ok((false, None))
            },
        }
    }

    /// Returns the cached result of a call, computing and storing it on miss.
    ///
    /// # Errors
    ///
    /// Returns `compute`'s error, or a cache error.
    pub fn cached<A, K, R, F>(
        &self,
        name: &str,
        args: &A,
        kwargs: &K,
        ttl: Duration,
        compute: F,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<R>,
    {
        if let (true, Some(value)) = self.get(name, args, kwargs, ttl)? {
            return Ok(value);
        }
        let value = compute()?;
        self.set(name, args, kwargs, &value)?;
        Ok(value)
    }

    /// Deletes stored results, for one function or for all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn flush(&self, name: Option<&str>) -> Result<u64> {
        self.store.run("function_cache.flush", || match name {
            Some(name) => {
                let name = self.store.bound(&TABLE, "name", name);
                self.store
                    .executor()
                    .execute(&self.flush_name, &sql_params![&*name])
            },
            None => self.store.executor().execute(&self.flush_all, &[]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, MemorySettings};
    use crate::MediaCache;
    use serde_json::json;
    use std::cell::Cell;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000;

    fn open(dir: &TempDir, clock: &Arc<ManualClock>) -> MediaCache {
        MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .clock(Arc::clone(clock) as Arc<dyn crate::Clock>)
            .open()
            .unwrap()
    }

    #[test]
    fn test_call_key_ignores_kwarg_order() {
        let a = call_key("f", &json!([1, "x"]), &json!({"a": 1, "b": 2})).unwrap();
        let b = call_key("f", &json!([1, "x"]), &json!({"b": 2, "a": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_call_key_separates_fields() {
        // Shifting text between name and arguments must change the key
        let a = call_key("ab", &json!(["c"]), &json!({})).unwrap();
        let b = call_key("a", &json!(["bc"]), &json!({})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_set_get_with_ttl() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let functions = cache.functions();
        let ttl = Duration::from_secs(3600);

        assert!(functions.set("lookup", &("tt0133093",), &json!({}), &vec![1, 2, 3]).unwrap());

        clock.set(T0 + 3599);
        let (hit, value): (bool, Option<Vec<i32>>) =
            functions.get("lookup", &("tt0133093",), &json!({}), ttl).unwrap();
        assert!(hit);
        assert_eq!(value, Some(vec![1, 2, 3]));

        clock.set(T0 + 3601);
        let (hit, value): (bool, Option<Vec<i32>>) =
            functions.get("lookup", &("tt0133093",), &json!({}), ttl).unwrap();
        assert!(!hit);
        assert!(value.is_none());
    }

    #[test]
    fn test_oversized_result_is_skipped() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);

        let big = "x".repeat(MAX_RESULT_BYTES);
        assert!(!cache.functions().set("big", &(), &(), &big).unwrap());
        let (hit, _): (bool, Option<String>) = cache
            .functions()
            .get("big", &(), &(), Duration::from_secs(60))
            .unwrap();
        assert!(!hit);
    }

    #[test]
    fn test_cached_computes_once() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let calls = Cell::new(0);
        let ttl = Duration::from_secs(60);

        for _ in 0..3 {
            let value: String = cache
                .functions()
                .cached("title", &[42], &(), ttl, || {
                    calls.set(calls.get() + 1);
                    Ok("The Answer".to_string())
                })
                .unwrap();
            assert_eq!(value, "The Answer");
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_flush_by_name() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let functions = cache.functions();

        functions.set("a", &[1], &(), &1).unwrap();
        functions.set("a", &[2], &(), &2).unwrap();
        functions.set("b", &[1], &(), &3).unwrap();

        assert_eq!(functions.flush(Some("a")).unwrap(), 2);
        assert_eq!(functions.flush(None).unwrap(), 1);
    }
}
