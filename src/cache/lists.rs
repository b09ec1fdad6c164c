//! Small user lists: saved searches, bookmarks, named lists and genres.

use super::CacheStore;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Row, Statement, TableDef};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

pub(crate) const SAVED_SEARCHES: TableDef = TableDef {
    name: "saved_searches",
    columns: &[
        Column::required("id", ColumnType::Serial),
        Column::required("search_type", ColumnType::Key(32)),
        Column::required("query", ColumnType::Key(255)),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["search_type", "query"],
    indexes: &["search_type"],
    durable: true,
};

pub(crate) const BOOKMARKS: TableDef = TableDef {
    name: "bookmarks",
    columns: &[
        Column::required("content_type", ColumnType::Key(32)),
        Column::required("item_id", ColumnType::Key(255)),
        Column::required("title", ColumnType::Text),
        Column::optional("url", ColumnType::Text),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["content_type", "item_id"],
    indexes: &[],
    durable: true,
};

pub(crate) const OTHER_LISTS: TableDef = TableDef {
    name: "other_lists",
    columns: &[
        Column::required("list_name", ColumnType::Key(64)),
        Column::required("item_id", ColumnType::Key(255)),
        Column::optional("payload", ColumnType::Text),
        Column::required("created_at", ColumnType::Integer),
    ],
    key: &["list_name", "item_id"],
    indexes: &[],
    durable: true,
};

pub(crate) const GENRES: TableDef = TableDef {
    name: "genre_cache",
    columns: &[
        Column::required("media_type", ColumnType::Key(32)),
        Column::required("genre_id", ColumnType::Key(64)),
        Column::required("name", ColumnType::Text),
    ],
    key: &["media_type", "genre_id"],
    indexes: &[],
    durable: true,
};

/// A saved search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
    /// Surrogate id, for [`SavedSearches::remove`].
    pub id: i64,
    /// Search category (`movie`, `tvshow`, `people`, ...).
    pub search_type: String,
    /// Search text.
    pub query: String,
    /// When the search was last saved.
    pub created_at: i64,
}

/// Recently used searches per category.
pub struct SavedSearches {
    store: Arc<CacheStore>,
    upsert: Statement,
    list: Statement,
    remove: Statement,
    clear: Statement,
}

impl SavedSearches {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("saved_searches.add", &SAVED_SEARCHES),
            list: exec.prepare(
                "saved_searches.list",
                "SELECT id, search_type, query, created_at FROM saved_searches \
                 WHERE search_type = ? ORDER BY created_at DESC, id DESC",
            ),
            remove: exec.prepare("saved_searches.remove", "DELETE FROM saved_searches WHERE id = ?"),
            clear: exec.prepare(
                "saved_searches.clear",
                "DELETE FROM saved_searches WHERE search_type = ?",
            ),
            store,
        }
    }

    /// Saves `query` under `search_type`; saving it again moves it to the front.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    #[instrument(skip(self), fields(operation = "saved_searches.add"))]
    pub fn add(&self, search_type: &str, query: &str) -> Result<()> {
        let kind = self.store.bound(&SAVED_SEARCHES, "search_type", search_type);
        let query = self.store.bound(&SAVED_SEARCHES, "query", query);
        self.store.run("saved_searches.add", || {
            let now = self.store.now();
            self.store
                .executor()
                .execute(&self.upsert, &sql_params![&*kind, &*query, now])
        })?;
        Ok(())
    }

    /// Lists the searches of one category, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "saved_searches.list"))]
    pub fn list(&self, search_type: &str) -> Result<Vec<SavedSearch>> {
        let kind = self.store.bound(&SAVED_SEARCHES, "search_type", search_type);
        let rows = self.store.run("saved_searches.list", || {
            self.store
                .executor()
                .query(&self.list, &sql_params![&*kind])
        })?;
        Ok(rows
            .iter()
            .map(|r| SavedSearch {
                id: r.integer(0).unwrap_or(0),
                search_type: r.text(1).unwrap_or_default(),
                query: r.text(2).unwrap_or_default(),
                created_at: r.integer(3).unwrap_or(0),
            })
            .collect())
    }

    /// Removes one saved search by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn remove(&self, id: i64) -> Result<bool> {
        let removed = self.store.run("saved_searches.remove", || {
            self.store.executor().execute(&self.remove, &sql_params![id])
        })?;
        Ok(removed > 0)
    }

    /// Removes every saved search of one category.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn clear(&self, search_type: &str) -> Result<u64> {
        let kind = self.store.bound(&SAVED_SEARCHES, "search_type", search_type);
        self.store.run("saved_searches.clear", || {
            self.store
                .executor()
                .execute(&self.clear, &sql_params![&*kind])
        })
    }
}

/// A bookmarked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Item category.
    pub content_type: String,
    /// Item identifier.
    pub item_id: String,
    /// Display title.
    pub title: String,
    /// Optional page URL.
    pub url: Option<String>,
    /// When the bookmark was set.
    pub created_at: i64,
}

impl Bookmark {
    fn from_row(r: &Row) -> Self {
        Self {
            content_type: r.text(0).unwrap_or_default(),
            item_id: r.text(1).unwrap_or_default(),
            title: r.text(2).unwrap_or_default(),
            url: r.text(3),
            created_at: r.integer(4).unwrap_or(0),
        }
    }
}

/// User bookmarks.
pub struct Bookmarks {
    store: Arc<CacheStore>,
    upsert: Statement,
    get: Statement,
    list_all: Statement,
    list_type: Statement,
    remove: Statement,
}

const BOOKMARK_COLUMNS: &str = "content_type, item_id, title, url, created_at";

impl Bookmarks {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("bookmarks.set", &BOOKMARKS),
            get: exec.prepare(
                "bookmarks.get",
                &format!(
                    "SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE content_type = ? AND item_id = ?"
                ),
            ),
            list_all: exec.prepare(
                "bookmarks.list",
                &format!("SELECT {BOOKMARK_COLUMNS} FROM bookmarks ORDER BY created_at DESC, item_id"),
            ),
            list_type: exec.prepare(
                "bookmarks.list",
                &format!(
                    "SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE content_type = ? \
                     ORDER BY created_at DESC, item_id"
                ),
            ),
            remove: exec.prepare(
                "bookmarks.remove",
                "DELETE FROM bookmarks WHERE content_type = ? AND item_id = ?",
            ),
            store,
        }
    }

    /// Bookmarks an item, replacing an existing bookmark for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    #[instrument(skip(self), fields(operation = "bookmarks.set"))]
    pub fn set(&self, content_type: &str, item_id: &str, title: &str, url: Option<&str>) -> Result<()> {
        let kind = self.store.bound(&BOOKMARKS, "content_type", content_type);
        let item = self.store.bound(&BOOKMARKS, "item_id", item_id);
        self.store.run("bookmarks.set", || {
            let now = self.store.now();
            self.store
                .executor()
                .execute(&self.upsert, &sql_params![&*kind, &*item, title, url, now])
        })?;
        Ok(())
    }

    /// Returns one bookmark.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    pub fn get(&self, content_type: &str, item_id: &str) -> Result<Option<Bookmark>> {
        let kind = self.store.bound(&BOOKMARKS, "content_type", content_type);
        let item = self.store.bound(&BOOKMARKS, "item_id", item_id);
        let rows = self.store.run("bookmarks.get", || {
            self.store
                .executor()
                .query(&self.get, &sql_params![&*kind, &*item])
        })?;
        Ok(rows.first().map(Bookmark::from_row))
    }

    /// Lists bookmarks, newest first, optionally for one category.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    #[instrument(skip(self), fields(operation = "bookmarks.list"))]
    pub fn list(&self, content_type: Option<&str>) -> Result<Vec<Bookmark>> {
        let rows = self.store.run("bookmarks.list", || match content_type {
            Some(kind) => {
                let kind = self.store.bound(&BOOKMARKS, "content_type", kind);
                self.store
                    .executor()
                    .query(&self.list_type, &sql_params![&*kind])
            },
            None => self.store.executor().query(&self.list_all, &[]),
        })?;
        Ok(rows.iter().map(Bookmark::from_row).collect())
    }

    /// Removes one bookmark.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn remove(&self, content_type: &str, item_id: &str) -> Result<bool> {
        let kind = self.store.bound(&BOOKMARKS, "content_type", content_type);
        let item = self.store.bound(&BOOKMARKS, "item_id", item_id);
        let removed = self.store.run("bookmarks.remove", || {
            self.store
                .executor()
                .execute(&self.remove, &sql_params![&*kind, &*item])
        })?;
        Ok(removed > 0)
    }
}

/// One entry of a named list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Item identifier.
    pub item_id: String,
    /// Opaque caller data.
    pub payload: Option<String>,
    /// When the entry was set.
    pub created_at: i64,
}

/// Named lists of items (watch later, favourites, ...).
pub struct OtherLists {
    store: Arc<CacheStore>,
    upsert: Statement,
    list: Statement,
    remove: Statement,
    clear: Statement,
}

impl OtherLists {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("other_lists.set", &OTHER_LISTS),
            list: exec.prepare(
                "other_lists.list",
                "SELECT item_id, payload, created_at FROM other_lists \
                 WHERE list_name = ? ORDER BY created_at DESC, item_id",
            ),
            remove: exec.prepare(
                "other_lists.remove",
                "DELETE FROM other_lists WHERE list_name = ? AND item_id = ?",
            ),
            clear: exec.prepare("other_lists.clear", "DELETE FROM other_lists WHERE list_name = ?"),
            store,
        }
    }

    /// Adds or replaces an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    #[instrument(skip(self, payload), fields(operation = "other_lists.set"))]
    pub fn set(&self, list_name: &str, item_id: &str, payload: Option<&str>) -> Result<()> {
        let list = self.store.bound(&OTHER_LISTS, "list_name", list_name);
        let item = self.store.bound(&OTHER_LISTS, "item_id", item_id);
        self.store.run("other_lists.set", || {
            let now = self.store.now();
            self.store
                .executor()
                .execute(&self.upsert, &sql_params![&*list, &*item, payload, now])
        })?;
        Ok(())
    }

    /// Lists a named list, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    pub fn list(&self, list_name: &str) -> Result<Vec<ListEntry>> {
        let list = self.store.bound(&OTHER_LISTS, "list_name", list_name);
        let rows = self.store.run("other_lists.list", || {
            self.store
                .executor()
                .query(&self.list, &sql_params![&*list])
        })?;
        Ok(rows
            .iter()
            .map(|r| ListEntry {
                item_id: r.text(0).unwrap_or_default(),
                payload: r.text(1),
                created_at: r.integer(2).unwrap_or(0),
            })
            .collect())
    }

    /// Removes one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn remove(&self, list_name: &str, item_id: &str) -> Result<bool> {
        let list = self.store.bound(&OTHER_LISTS, "list_name", list_name);
        let item = self.store.bound(&OTHER_LISTS, "item_id", item_id);
        let removed = self.store.run("other_lists.remove", || {
            self.store
                .executor()
                .execute(&self.remove, &sql_params![&*list, &*item])
        })?;
        Ok(removed > 0)
    }

    /// Removes every entry of a named list.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails after recovery.
    pub fn clear(&self, list_name: &str) -> Result<u64> {
        let list = self.store.bound(&OTHER_LISTS, "list_name", list_name);
        self.store.run("other_lists.clear", || {
            self.store
                .executor()
                .execute(&self.clear, &sql_params![&*list])
        })
    }
}

/// A genre id and its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    /// Catalogue genre id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Genre id to name lookups per media type.
pub struct GenreCache {
    store: Arc<CacheStore>,
    upsert: Statement,
    get: Statement,
    list: Statement,
}

impl GenreCache {
    pub(crate) fn new(store: Arc<CacheStore>) -> Self {
        let exec = store.executor();
        Self {
            upsert: exec.upsert("genre_cache.set", &GENRES),
            get: exec.prepare(
                "genre_cache.get",
                "SELECT name FROM genre_cache WHERE media_type = ? AND genre_id = ?",
            ),
            list: exec.prepare(
                "genre_cache.list",
                "SELECT genre_id, name FROM genre_cache WHERE media_type = ? ORDER BY name, genre_id",
            ),
            store,
        }
    }

    /// Stores a genre name.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails after recovery.
    pub fn set(&self, media_type: &str, genre_id: &str, name: &str) -> Result<()> {
        let media = self.store.bound(&GENRES, "media_type", media_type);
        let id = self.store.bound(&GENRES, "genre_id", genre_id);
        self.store.run("genre_cache.set", || {
            self.store
                .executor()
                .execute(&self.upsert, &sql_params![&*media, &*id, name])
        })?;
        Ok(())
    }

    /// Returns a genre name.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    pub fn get(&self, media_type: &str, genre_id: &str) -> Result<Option<String>> {
        let media = self.store.bound(&GENRES, "media_type", media_type);
        let id = self.store.bound(&GENRES, "genre_id", genre_id);
        let rows = self.store.run("genre_cache.get", || {
            self.store
                .executor()
                .query(&self.get, &sql_params![&*media, &*id])
        })?;
        Ok(rows.first().and_then(|r| r.text(0)))
    }

    /// Lists the genres of one media type by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails after recovery.
    pub fn list(&self, media_type: &str) -> Result<Vec<Genre>> {
        let media = self.store.bound(&GENRES, "media_type", media_type);
        let rows = self.store.run("genre_cache.list", || {
            self.store
                .executor()
                .query(&self.list, &sql_params![&*media])
        })?;
        Ok(rows
            .iter()
            .map(|r| Genre {
                id: r.text(0).unwrap_or_default(),
                name: r.text(1).unwrap_or_default(),
            })
            .collect())
    }
}
