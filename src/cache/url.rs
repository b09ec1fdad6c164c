//! Network response cache.
//!
//! Responses are keyed by URL plus a digest of the request (POST body,
//! auth variant and so on; empty for plain GETs). Freshness is decided at
//! read time against the caller's TTL, so one stored row can be fresh for
//! one caller and stale for another. Stale rows stay until [`UrlCache::prune`]
//! or [`UrlCache::flush`] removes them.

use super::CacheStore;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Statement, TableDef};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const SECONDS_PER_DAY: i64 = 86_400;

pub(crate) const TABLE: TableDef = TableDef {
    name: "url_cache",
    columns: &[
        Column::required("url", ColumnType::Key(2048)),
        Column::required("request_digest", ColumnType::Key(255)),
        Column::optional("body", ColumnType::Blob),
        Column::optional("headers", ColumnType::Text),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["url", "request_digest"],
    indexes: &["created_at"],
    durable: false,
};

/// A cached response. Empty on miss.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedResponse {
    /// When the response was stored; `None` on miss.
    pub created_at: Option<i64>,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Returns `true` for a miss or an expired entry.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.created_at.is_none()
    }
}

/// Fetched network responses.
pub struct UrlCache {
    store: Arc<CacheStore>,
    upsert: Statement,
    select: Statement,
    oldest: Statement,
    delete_range: Statement,
    flush: Statement,
}

impl UrlCache {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("url_cache.set", &TABLE),
            select: exec.prepare(
                "url_cache.get",
                "SELECT body, headers, created_at FROM url_cache WHERE url = ? AND request_digest = ?",
            ),
            oldest: exec.prepare(
                "url_cache.prune",
                "SELECT MIN(created_at) FROM url_cache WHERE created_at < ?",
            ),
            delete_range: exec.prepare(
                "url_cache.prune",
                "DELETE FROM url_cache WHERE created_at >= ? AND created_at < ?",
            ),
            flush: exec.prepare("url_cache.flush", "DELETE FROM url_cache"),
            store,
        }
    }

    /// Stores a response, replacing any previous one for the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers cannot be serialized or the write fails.
    #[instrument(skip(self, body, headers), fields(operation = "url_cache.set", bytes = body.len()))]
    pub fn set(
        &self,
        url: &str,
        body: &[u8],
        request_digest: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        let url = self.store.bound(&TABLE, "url", url);
        let digest = self.store.bound(&TABLE, "request_digest", request_digest);
        let headers =
            serde_json::to_string(headers).map_err(|e| crate::Error::failed("encode_headers", e))?;

        self.store.run("url_cache.set", || {
            let now = self.store.now();
            self.store.executor().execute(
                &self.upsert,
                &sql_params![&*url, &*digest, body, headers.as_str(), now],
            )
        })?;
        Ok(())
    }

    /// Returns the cached response if it is at most `ttl` old.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "url_cache.get"))]
    pub fn get(&self, url: &str, request_digest: &str, ttl: Duration) -> Result<CachedResponse> {
        let url = self.store.bound(&TABLE, "url", url);
        let digest = self.store.bound(&TABLE, "request_digest", request_digest);

        let rows = self.store.run("url_cache.get", || {
            self.store
                .executor()
                .query(&self.select, &sql_params![&*url, &*digest])
        })?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(CachedResponse::default());
        };

        let created_at = row.integer(2).unwrap_or(0);
        let age = self.store.now() - created_at;
        if age > i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX) {
            tracing::debug!(age, "Cached response expired");
            return Ok(CachedResponse::default());
        }

        let headers = row
            .text(1)
            .map(|raw| {
                serde_json::from_str(&raw).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Discarding unreadable cached headers");
                    BTreeMap::new()
                })
            })
            .unwrap_or_default();

        Ok(CachedResponse {
            created_at: Some(created_at),
            headers,
            body: row.blob(0).unwrap_or_default(),
        })
    }

    /// Deletes the oldest calendar day of responses older than `max_age`.
    ///
    /// Returns the number of rows removed, or `None` if nothing is older
    /// than the cutoff. Call repeatedly to prune further.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or delete fails after recovery.
    #[instrument(skip(self), fields(operation = "url_cache.prune"))]
    pub fn prune(&self, max_age: Duration) -> Result<Option<usize>> {
        let cutoff = self.store.now() - i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);

        let rows = self.store.run("url_cache.prune", || {
            self.store.executor().query(&self.oldest, &sql_params![cutoff])
        })?;
        let Some(oldest) = rows.first().and_then(|r| r.integer(0)) else {
            return Ok(None);
        };

        let day_start = oldest - oldest.rem_euclid(SECONDS_PER_DAY);
        let day_end = (day_start + SECONDS_PER_DAY).min(cutoff);
        let removed = self.store.run("url_cache.prune", || {
            self.store
                .executor()
                .execute(&self.delete_range, &sql_params![day_start, day_end])
        })?;

        let day = chrono::DateTime::from_timestamp(day_start, 0)
            .map(|d| d.date_naive().to_string())
            .unwrap_or_default();
        tracing::info!(day = %day, removed, "Pruned cached responses");
        Ok(Some(usize::try_from(removed).unwrap_or(usize::MAX)))
    }

    /// Deletes every cached response.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn flush(&self) -> Result<u64> {
        self.store
            .run("url_cache.flush", || self.store.executor().execute(&self.flush, &[]))
    }
}
