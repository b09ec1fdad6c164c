//! External ID cross-references.
//!
//! Maps an identifier in one catalogue to the matching identifier in
//! another (for example an IMDb id to a TMDb id). Last write wins.

use super::CacheStore;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Statement, TableDef};
use crate::Result;
use std::sync::Arc;
use tracing::instrument;

pub(crate) const TABLE: TableDef = TableDef {
    name: "id_mapping",
    columns: &[
        Column::required("source_id", ColumnType::Key(255)),
        Column::required("target_id", ColumnType::Text),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["source_id"],
    indexes: &[],
    durable: true,
};

/// An authoritative remote mapping service.
pub trait ExternalIdStore: Send + Sync {
    /// Looks up the mapping for `source_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote service cannot be reached.
    fn lookup(&self, source_id: &str) -> Result<Option<String>>;
}

/// Local ID mapping cache.
pub struct IdMapping {
    store: Arc<CacheStore>,
    upsert: Statement,
    select: Statement,
    delete: Statement,
}

impl IdMapping {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("id_mapping.set", &TABLE),
            select: exec.prepare(
                "id_mapping.get",
                "SELECT target_id FROM id_mapping WHERE source_id = ?",
            ),
            delete: exec.prepare("id_mapping.delete", "DELETE FROM id_mapping WHERE source_id = ?"),
            store,
        }
    }

    /// Records `source_id -> target_id`, replacing any previous mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    #[instrument(skip(self), fields(operation = "id_mapping.set"))]
    pub fn set(&self, source_id: &str, target_id: &str) -> Result<()> {
        let source = self.store.bound(&TABLE, "source_id", source_id);
        self.store.run("id_mapping.set", || {
            let now = self.store.now();
            self.store
                .executor()
                .execute(&self.upsert, &sql_params![&*source, target_id, now])
        })?;
        Ok(())
    }

    /// Returns the locally cached mapping for `source_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "id_mapping.get"))]
    pub fn get(&self, source_id: &str) -> Result<Option<String>> {
        let source = self.store.bound(&TABLE, "source_id", source_id);
        let rows = self.store.run("id_mapping.get", || {
            self.store
                .executor()
                .query(&self.select, &sql_params![&*source])
        })?;
        Ok(rows.first().and_then(|r| r.text(0)))
    }

    /// Deletes the mapping for `source_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn delete(&self, source_id: &str) -> Result<bool> {
        let source = self.store.bound(&TABLE, "source_id", source_id);
        let removed = self.store.run("id_mapping.delete", || {
            self.store
                .executor()
                .execute(&self.delete, &sql_params![&*source])
        })?;
        Ok(removed > 0)
    }

    /// Read-through lookup: asks `external` first and caches its answer,
    /// falling back to the local mapping when the remote has none or fails.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local cache fails.
    #[instrument(skip(self, external), fields(operation = "id_mapping.get_cached"))]
    pub fn get_cached(&self, external: &dyn ExternalIdStore, source_id: &str) -> Result<Option<String>> {
        match external.lookup(source_id) {
            Ok(Some(target)) => {
                self.set(source_id, &target)?;
                Ok(Some(target))
            },
            Ok(None) => self.get(source_id),
            Err(e) => {
                tracing::warn!(error = %e, "External ID lookup failed, using local mapping");
                self.get(source_id)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, MemorySettings};
    use crate::{Error, MediaCache};
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct FakeRemote(HashMap<&'static str, &'static str>);

    impl ExternalIdStore for FakeRemote {
        fn lookup(&self, source_id: &str) -> Result<Option<String>> {
            Ok(self.0.get(source_id).map(ToString::to_string))
        }
    }

    struct DownRemote;

    impl ExternalIdStore for DownRemote {
        fn lookup(&self, _source_id: &str) -> Result<Option<String>> {
            Err(Error::failed("remote_lookup", "connection refused"))
        }
    }

    fn open(dir: &TempDir) -> MediaCache {
        MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .open()
            .unwrap()
    }

    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.ids().set("tt0133093", "603").unwrap();
        cache.ids().set("tt0133093", "604").unwrap();
        assert_eq!(cache.ids().get("tt0133093").unwrap().as_deref(), Some("604"));
        assert!(cache.ids().delete("tt0133093").unwrap());
        assert_eq!(cache.ids().get("tt0133093").unwrap(), None);
    }

    #[test]
    fn test_get_cached_backfills_from_remote() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let remote = FakeRemote(HashMap::from([("tt1", "100")]));

        assert_eq!(cache.ids().get_cached(&remote, "tt1").unwrap().as_deref(), Some("100"));
        assert_eq!(cache.ids().get("tt1").unwrap().as_deref(), Some("100"));
    }

    #[test]
    fn test_get_cached_falls_back_to_local() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.ids().set("tt2", "200").unwrap();

        let empty = FakeRemote(HashMap::new());
        assert_eq!(cache.ids().get_cached(&empty, "tt2").unwrap().as_deref(), Some("200"));
        assert_eq!(cache.ids().get_cached(&DownRemote, "tt2").unwrap().as_deref(), Some("200"));
        assert_eq!(cache.ids().get_cached(&DownRemote, "tt3").unwrap(), None);
    }
}
