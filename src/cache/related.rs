//! Related-URL hints.
//!
//! Remembers which page a source site resolved a title to, so the next
//! lookup for the same title can skip the search step.

use super::CacheStore;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Statement, TableDef, Value};
use crate::Result;
use std::sync::Arc;
use tracing::instrument;

pub(crate) const TABLE: TableDef = TableDef {
    name: "related_urls",
    columns: &[
        Column::required("content_type", ColumnType::Key(32)),
        Column::required("title", ColumnType::Key(255)),
        Column::required("year", ColumnType::Integer),
        Column::required("season", ColumnType::Integer),
        Column::required("episode", ColumnType::Integer),
        Column::required("source", ColumnType::Key(64)),
        Column::optional("url", ColumnType::Text),
    ],
    key: &["content_type", "title", "year", "season", "episode", "source"],
    indexes: &[],
    durable: true,
};

/// Identifies one related-URL hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelatedUrlKey {
    /// `movie` or `episode`.
    pub content_type: String,
    /// Title as searched.
    pub title: String,
    /// Release year, 0 when unknown.
    pub year: i64,
    /// Season, 0 for movies.
    pub season: i64,
    /// Episode, 0 for movies.
    pub episode: i64,
    /// Source site name.
    pub source: String,
}

impl RelatedUrlKey {
    /// Key for a movie.
    #[must_use]
    pub fn movie(title: impl Into<String>, year: i64, source: impl Into<String>) -> Self {
        Self {
            content_type: "movie".to_string(),
            title: title.into(),
            year,
            season: 0,
            episode: 0,
            source: source.into(),
        }
    }

    /// Key for an episode.
    #[must_use]
    pub fn episode(
        title: impl Into<String>,
        year: i64,
        season: i64,
        episode: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            content_type: "episode".to_string(),
            title: title.into(),
            year,
            season,
            episode,
            source: source.into(),
        }
    }
}

/// Related-URL hints per title and source.
pub struct RelatedUrls {
    store: Arc<CacheStore>,
    upsert: Statement,
    select: Statement,
    delete: Statement,
}

const KEY_FILTER: &str = "content_type = ? AND title = ? AND year = ? AND season = ? \
                          AND episode = ? AND source = ?";

impl RelatedUrls {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("related_urls.set", &TABLE),
            select: exec.prepare(
                "related_urls.get",
                &format!("SELECT url FROM related_urls WHERE {KEY_FILTER}"),
            ),
            delete: exec.prepare(
                "related_urls.delete",
                &format!("DELETE FROM related_urls WHERE {KEY_FILTER}"),
            ),
            store,
        }
    }

    fn key_params(&self, key: &RelatedUrlKey) -> Vec<Value> {
        sql_params![
            &*self.store.bound(&TABLE, "content_type", &key.content_type),
            &*self.store.bound(&TABLE, "title", &key.title),
            key.year,
            key.season,
            key.episode,
            &*self.store.bound(&TABLE, "source", &key.source),
        ]
    }

    /// Stores the URL for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    #[instrument(skip(self), fields(operation = "related_urls.set"))]
    pub fn set(&self, key: &RelatedUrlKey, url: &str) -> Result<()> {
        let mut params = self.key_params(key);
        params.push(Value::from(url));
        self.store.run("related_urls.set", || {
            self.store.executor().execute(&self.upsert, &params)
        })?;
        Ok(())
    }

    /// Returns the URL stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "related_urls.get"))]
    pub fn get(&self, key: &RelatedUrlKey) -> Result<Option<String>> {
        let params = self.key_params(key);
        let rows = self.store.run("related_urls.get", || {
            self.store.executor().query(&self.select, &params)
        })?;
        Ok(rows.first().and_then(|r| r.text(0)))
    }

    /// Deletes the URL stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn delete(&self, key: &RelatedUrlKey) -> Result<bool> {
        let params = self.key_params(key);
        let removed = self.store.run("related_urls.delete", || {
            self.store.executor().execute(&self.delete, &params)
        })?;
        Ok(removed > 0)
    }
}
