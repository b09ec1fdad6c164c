//! Artwork URL cache.
//!
//! One row per (object type, external id, season, episode). Shows and
//! movies use season 0 / episode 0.

use super::CacheStore;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Row, Statement, TableDef, Value};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub(crate) const TABLE: TableDef = TableDef {
    name: "image_cache",
    columns: &[
        Column::required("object_type", ColumnType::Key(32)),
        Column::required("external_id", ColumnType::Key(255)),
        Column::required("season", ColumnType::Integer),
        Column::required("episode", ColumnType::Integer),
        Column::optional("banner", ColumnType::Text),
        Column::optional("fanart", ColumnType::Text),
        Column::optional("thumb", ColumnType::Text),
        Column::optional("poster", ColumnType::Text),
        Column::optional("clearart", ColumnType::Text),
        Column::optional("clearlogo", ColumnType::Text),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["object_type", "external_id", "season", "episode"],
    indexes: &[],
    durable: true,
};

/// Identifies the object a set of images belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    /// `movie`, `tvshow`, `season`, `episode`, ...
    pub object_type: String,
    /// Identifier in the external catalogue.
    pub external_id: String,
    /// Season number, 0 when not applicable.
    pub season: i64,
    /// Episode number, 0 when not applicable.
    pub episode: i64,
}

impl ImageKey {
    /// Key for a whole show or movie.
    #[must_use]
    pub fn new(object_type: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            external_id: external_id.into(),
            season: 0,
            episode: 0,
        }
    }

    /// Narrows the key to one season and episode.
    #[must_use]
    pub const fn with_episode(mut self, season: i64, episode: i64) -> Self {
        self.season = season;
        self.episode = episode;
        self
    }
}

/// Artwork URLs for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    /// Wide banner.
    pub banner: Option<String>,
    /// Background art.
    pub fanart: Option<String>,
    /// Thumbnail.
    pub thumb: Option<String>,
    /// Poster.
    pub poster: Option<String>,
    /// Transparent character art.
    pub clearart: Option<String>,
    /// Transparent logo.
    pub clearlogo: Option<String>,
}

impl ImageSet {
    /// Returns `true` when no URL is set. Empty strings count as unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields()
            .iter()
            .all(|f| f.as_deref().is_none_or(str::is_empty))
    }

    fn fields(&self) -> [&Option<String>; 6] {
        [
            &self.banner,
            &self.fanart,
            &self.thumb,
            &self.poster,
            &self.clearart,
            &self.clearlogo,
        ]
    }

    fn from_row(row: &Row, offset: usize) -> Self {
        let field = |i: usize| row.text(offset + i).filter(|s| !s.is_empty());
        Self {
            banner: field(0),
            fanart: field(1),
            thumb: field(2),
            poster: field(3),
            clearart: field(4),
            clearlogo: field(5),
        }
    }
}

fn non_empty(value: &Option<String>) -> Value {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .map_or(Value::Null, Value::from)
}

/// Artwork URLs per media object.
pub struct ImageCache {
    store: Arc<CacheStore>,
    upsert: Statement,
    select: Statement,
    exists: Statement,
    latest: Statement,
    delete: Statement,
}

impl ImageCache {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("image_cache.set", &TABLE),
            select: exec.prepare(
                "image_cache.get",
                "SELECT created_at, banner, fanart, thumb, poster, clearart, clearlogo \
                 FROM image_cache \
                 WHERE object_type = ? AND external_id = ? AND season = ? AND episode = ?",
            ),
            exists: exec.prepare(
                "image_cache.resolve",
                "SELECT 1 FROM image_cache \
                 WHERE object_type = ? AND external_id = ? AND season = ? AND episode = ?",
            ),
            latest: exec.prepare(
                "image_cache.resolve",
                "SELECT season, episode FROM image_cache \
                 WHERE object_type = ? AND external_id = ? \
                 ORDER BY created_at DESC, season DESC, episode DESC LIMIT 1",
            ),
            delete: exec.prepare(
                "image_cache.delete",
                "DELETE FROM image_cache \
                 WHERE object_type = ? AND external_id = ? AND season = ? AND episode = ?",
            ),
            store,
        }
    }

    fn key_params(&self, key: &ImageKey) -> Vec<Value> {
        sql_params![
            &*self.store.bound(&TABLE, "object_type", &key.object_type),
            &*self.store.bound(&TABLE, "external_id", &key.external_id),
            key.season,
            key.episode,
        ]
    }

    /// Stores the artwork for `key`. Empty strings are stored as `NULL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    #[instrument(skip(self, images), fields(operation = "image_cache.set"))]
    pub fn set(&self, key: &ImageKey, images: &ImageSet) -> Result<()> {
        let mut params = self.key_params(key);
        params.extend(images.fields().into_iter().map(non_empty));

        self.store.run("image_cache.set", || {
            let mut params = params.clone();
            params.push(Value::Integer(self.store.now()));
            self.store.executor().execute(&self.upsert, &params)
        })?;
        Ok(())
    }

    /// Returns the artwork stored for `key` at most `ttl` ago.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "image_cache.get"))]
    pub fn get(&self, key: &ImageKey, ttl: Duration) -> Result<Option<ImageSet>> {
        let params = self.key_params(key);
        let rows = self.store.run("image_cache.get", || {
            self.store.executor().query(&self.select, &params)
        })?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let created_at = row.integer(0).unwrap_or(0);
        if self.store.now() - created_at > i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX) {
            return Ok(None);
        }
        Ok(Some(ImageSet::from_row(row, 1)))
    }

    /// Picks the season/episode pair to look artwork up under.
    ///
    /// Returns the requested pair when it is stored, otherwise the pair most
    /// recently written for the object, otherwise the requested pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "image_cache.resolve"))]
    pub fn resolve_season_episode(
        &self,
        object_type: &str,
        external_id: &str,
        season: i64,
        episode: i64,
    ) -> Result<(i64, i64)> {
        let key = ImageKey::new(object_type, external_id).with_episode(season, episode);
        let params = self.key_params(&key);
        let exact = self.store.run("image_cache.resolve", || {
            self.store.executor().query(&self.exists, &params)
        })?;
        if !exact.is_empty() {
            return Ok((season, episode));
        }

        let latest = self.store.run("image_cache.resolve", || {
            self.store.executor().query(&self.latest, &params[..2])
        })?;
        Ok(latest
            .first()
            .and_then(|row| Some((row.integer(0)?, row.integer(1)?)))
            .unwrap_or((season, episode)))
    }

    /// Deletes the artwork stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn delete(&self, key: &ImageKey) -> Result<bool> {
        let params = self.key_params(key);
        let removed = self.store.run("image_cache.delete", || {
            self.store.executor().execute(&self.delete, &params)
        })?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, MemorySettings};
    use crate::MediaCache;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000;

    fn open(dir: &TempDir, clock: &Arc<ManualClock>) -> MediaCache {
        MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .clock(Arc::clone(clock) as Arc<dyn crate::Clock>)
            .open()
            .unwrap()
    }

    fn poster(url: &str) -> ImageSet {
        ImageSet {
            poster: Some(url.to_string()),
            fanart: Some(String::new()),
            ..ImageSet::default()
        }
    }

    #[test]
    fn test_set_get_normalizes_empty_strings() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let key = ImageKey::new("movie", "603");

        cache.images().set(&key, &poster("https://img/p.jpg")).unwrap();
        let images = cache
            .images()
            .get(&key, Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(images.poster.as_deref(), Some("https://img/p.jpg"));
        assert_eq!(images.fanart, None);
        assert!(!images.is_empty());
    }

    #[test]
    fn test_image_set_is_empty() {
        assert!(ImageSet::default().is_empty());
        let blank = ImageSet {
            thumb: Some(String::new()),
            ..ImageSet::default()
        };
        assert!(blank.is_empty());
        assert!(!poster("https://img/p.jpg").is_empty());
    }

    #[test]
    fn test_get_respects_ttl() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let key = ImageKey::new("tvshow", "1399");
        let ttl = Duration::from_secs(600);

        cache.images().set(&key, &poster("p")).unwrap();
        clock.set(T0 + 599);
        assert!(cache.images().get(&key, ttl).unwrap().is_some());
        clock.set(T0 + 601);
        assert!(cache.images().get(&key, ttl).unwrap().is_none());
    }

    #[test]
    fn test_resolve_season_episode() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let images = cache.images();

        assert_eq!(images.resolve_season_episode("episode", "1399", 1, 1).unwrap(), (1, 1));

        images
            .set(&ImageKey::new("episode", "1399").with_episode(1, 2), &poster("a"))
            .unwrap();
        clock.advance(10);
        images
            .set(&ImageKey::new("episode", "1399").with_episode(2, 5), &poster("b"))
            .unwrap();

        assert_eq!(images.resolve_season_episode("episode", "1399", 1, 2).unwrap(), (1, 2));
        assert_eq!(images.resolve_season_episode("episode", "1399", 3, 1).unwrap(), (2, 5));
        assert_eq!(images.resolve_season_episode("episode", "other", 3, 1).unwrap(), (3, 1));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, &clock);
        let key = ImageKey::new("movie", "1");

        cache.images().set(&key, &poster("p")).unwrap();
        assert!(cache.images().delete(&key).unwrap());
        assert!(!cache.images().delete(&key).unwrap());
    }
}
