//! Archival storage: per-feed archives, counters, blobs, and the pluggable
//! backends that persist them.
//!
//! The two central traits are [`Storage`] (the manager: one per archive
//! root, owning counters, opaque blobs and the commit machinery) and
//! [`FeedStorage`] (one GUID-keyed article archive per feed URL). Handles
//! are `Arc`-shared and internally locked; the whole contract is
//! synchronous, with the only background activity being the debounced
//! commit scheduler.
//!
//! Three backends implement the contract:
//! - [`vault`] - one Atom XML file per feed plus a TOML counter index
//!   (the default)
//! - [`memory`] - everything in memory, with write-pass accounting for
//!   tests
//! - [`sqlite`] - a single SQLite database
//!
//! Backends are constructed through [`StorageFactory`] implementations
//! held in a [`StorageRegistry`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::item::{Category, Enclosure, Item, Person, Status};

pub mod memory;
pub mod registry;
mod rows;
mod scheduler;
pub mod sqlite;
pub mod vault;

pub use registry::{StorageFactory, StorageRegistry};

/// Errors surfaced by storage construction and durability operations.
///
/// Reads and per-field writes do not error: a read for an unknown GUID or
/// URL returns `None`, and a write for one is a no-op. What can fail is
/// opening a backend, flushing to disk, and reading back state that turns
/// out to be damaged.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be opened or created.
    #[error("failed to open storage: {0}")]
    OpenFailed(String),

    /// A commit could not be written out. The in-memory state is intact;
    /// the commit can be retried or rolled back.
    #[error("failed to write storage: {0}")]
    WriteFailed(String),

    /// Persisted state is unreadable or damaged. Affected data is not
    /// served partially; the operation fails instead.
    #[error("corrupt storage data: {0}")]
    CorruptIndex(String),

    /// The storage has been closed; only `close()` itself stays callable.
    #[error("storage is closed")]
    Closed,
}

/// Parameters for opening a storage backend.
#[derive(Debug, Clone)]
pub struct StorageParams {
    /// Directory that roots all of the backend's files.
    pub archive_path: PathBuf,
    /// Whether `close()` commits outstanding changes.
    pub auto_commit: bool,
    /// Durability window: how long a dirty storage may buffer changes
    /// before the background commit flushes them.
    pub commit_interval: Duration,
}

impl StorageParams {
    /// Creates parameters rooted at the given directory, with auto-commit
    /// enabled and the default 3 second durability window.
    pub fn new(archive_path: impl Into<PathBuf>) -> StorageParams {
        StorageParams {
            archive_path: archive_path.into(),
            auto_commit: true,
            commit_interval: Duration::from_millis(3000),
        }
    }

    /// Builds parameters from the loaded configuration.
    pub fn from_config(config: &crate::config::Config) -> StorageParams {
        StorageParams {
            archive_path: config.archive_path(),
            auto_commit: config.auto_commit,
            commit_interval: Duration::from_millis(config.commit_interval_ms),
        }
    }
}

impl Default for StorageParams {
    fn default() -> StorageParams {
        StorageParams::new(crate::config::default_archive_path())
    }
}

/// One feed's article archive, keyed by GUID.
///
/// Reads are `Option`-typed: `None` always means "no such article". Field
/// setters are no-ops for unknown GUIDs and mark the archive dirty
/// otherwise. Nothing here touches disk until [`commit`](FeedStorage::commit)
/// (or the owning manager's background commit) runs.
pub trait FeedStorage: Send + Sync + std::fmt::Debug {
    /// Creates a blank article for `guid` and increments the feed's total
    /// count. If the article already exists this only marks the archive
    /// dirty; the count is unchanged.
    fn add_entry(&self, guid: &str);

    /// Whether an article with this GUID exists. O(1) average.
    fn contains(&self, guid: &str) -> bool;

    /// Removes the article and decrements the total count. No-op when the
    /// GUID is unknown.
    fn delete_article(&self, guid: &str);

    /// Tombstones the article: blanks title, description, content, link,
    /// author and comments link in place. The row itself, its GUID, status
    /// and dates survive, so a re-fetch of the same GUID is recognized
    /// rather than resurrected.
    fn set_deleted(&self, guid: &str);

    /// Removes every article and resets both the unread and total counters
    /// to zero.
    fn clear(&self);

    /// All GUIDs in insertion order.
    fn articles(&self) -> Vec<String>;

    // ------------------------------------------------------------------
    // Counters, delegated to the owning manager's row for this feed URL.
    // ------------------------------------------------------------------

    fn unread(&self) -> i64;
    fn set_unread(&self, unread: i64);
    fn total_count(&self) -> i64;
    fn last_fetch(&self) -> Option<DateTime<Utc>>;
    fn set_last_fetch(&self, when: Option<DateTime<Utc>>);

    // ------------------------------------------------------------------
    // Per-article fields.
    // ------------------------------------------------------------------

    fn title(&self, guid: &str) -> Option<String>;
    fn set_title(&self, guid: &str, title: &str);

    fn description(&self, guid: &str) -> Option<String>;
    fn set_description(&self, guid: &str, description: &str);

    /// The article content. Backends fall back to the stored description
    /// when no content was ever set, mirroring [`Item::content`].
    fn content(&self, guid: &str) -> Option<String>;
    fn set_content(&self, guid: &str, content: &str);

    fn link(&self, guid: &str) -> Option<String>;
    fn set_link(&self, guid: &str, link: &str);

    fn author(&self, guid: &str) -> Option<Person>;
    fn set_author(&self, guid: &str, author: &Person);

    fn comments(&self, guid: &str) -> Option<i64>;
    fn set_comments(&self, guid: &str, count: i64);

    fn comments_link(&self, guid: &str) -> Option<String>;
    fn set_comments_link(&self, guid: &str, link: &str);

    fn status(&self, guid: &str) -> Option<Status>;
    fn set_status(&self, guid: &str, status: Status);

    fn pub_date(&self, guid: &str) -> Option<DateTime<Utc>>;
    fn set_pub_date(&self, guid: &str, date: Option<DateTime<Utc>>);

    fn hash(&self, guid: &str) -> Option<u32>;
    fn set_hash(&self, guid: &str, hash: u32);

    fn guid_is_hash(&self, guid: &str) -> Option<bool>;
    fn set_guid_is_hash(&self, guid: &str, is_hash: bool);

    fn guid_is_permalink(&self, guid: &str) -> Option<bool>;
    fn set_guid_is_permalink(&self, guid: &str, is_permalink: bool);

    /// Outer `None`: no such article. Inner `None`: the article exists but
    /// carries no enclosure.
    fn enclosure(&self, guid: &str) -> Option<Option<Enclosure>>;
    fn set_enclosure(&self, guid: &str, enclosure: &Enclosure);
    fn remove_enclosure(&self, guid: &str);

    fn categories(&self, guid: &str) -> Option<Vec<Category>>;
    /// Adds a category, deduplicated by term + scheme.
    fn add_category(&self, guid: &str, category: &Category);

    // ------------------------------------------------------------------
    // Durability.
    // ------------------------------------------------------------------

    /// Whether uncommitted changes exist.
    fn is_dirty(&self) -> bool;

    /// Flushes uncommitted changes. A clean archive commits without
    /// performing any write.
    fn commit(&self) -> Result<(), StorageError>;

    /// Discards uncommitted changes, restoring the last committed state.
    fn rollback(&self) -> Result<(), StorageError>;

    /// Commits (when the owning storage has auto-commit enabled) and
    /// releases the archive.
    fn close(&self) -> Result<(), StorageError>;

    // ------------------------------------------------------------------
    // Bulk transfer. Implemented on the trait surface so archives of
    // different backends can feed each other.
    // ------------------------------------------------------------------

    /// Copies one article field by field from `source`. Creates the
    /// article here if needed; no-op when `source` does not have it.
    fn copy_article(&self, guid: &str, source: &dyn FeedStorage) {
        if !source.contains(guid) {
            return;
        }
        self.add_entry(guid);
        if let Some(title) = source.title(guid) {
            self.set_title(guid, &title);
        }
        if let Some(description) = source.description(guid) {
            self.set_description(guid, &description);
        }
        if let Some(content) = source.content(guid) {
            self.set_content(guid, &content);
        }
        if let Some(link) = source.link(guid) {
            self.set_link(guid, &link);
        }
        if let Some(author) = source.author(guid) {
            self.set_author(guid, &author);
        }
        if let Some(count) = source.comments(guid) {
            self.set_comments(guid, count);
        }
        if let Some(link) = source.comments_link(guid) {
            self.set_comments_link(guid, &link);
        }
        if let Some(status) = source.status(guid) {
            self.set_status(guid, status);
        }
        if let Some(date) = source.pub_date(guid) {
            self.set_pub_date(guid, Some(date));
        }
        if let Some(hash) = source.hash(guid) {
            self.set_hash(guid, hash);
        }
        if let Some(is_hash) = source.guid_is_hash(guid) {
            self.set_guid_is_hash(guid, is_hash);
        }
        if let Some(is_permalink) = source.guid_is_permalink(guid) {
            self.set_guid_is_permalink(guid, is_permalink);
        }
        match source.enclosure(guid) {
            Some(Some(enclosure)) => self.set_enclosure(guid, &enclosure),
            Some(None) => self.remove_enclosure(guid),
            None => {}
        }
        if let Some(categories) = source.categories(guid) {
            for category in &categories {
                self.add_category(guid, category);
            }
        }
    }

    /// Copies every article from `source` into this archive, then adopts
    /// its unread count and last-fetch time. Articles already present are
    /// overwritten field by field.
    fn add(&self, source: &dyn FeedStorage) {
        for guid in source.articles() {
            self.copy_article(&guid, source);
        }
        self.set_unread(source.unread());
        self.set_last_fetch(source.last_fetch());
    }
}

/// The archive manager: owns one [`FeedStorage`] per feed URL, the
/// per-feed counters, and two opaque blobs (the subscription list and the
/// tag set).
///
/// Any mutation arms a debounced background commit; `commit()` flushes
/// everything (archives first, then counters and blobs) in one pass.
pub trait Storage: Send + Sync {
    /// Returns the archive for `url`, creating and caching it on first
    /// access. First access also registers a zeroed counter row.
    ///
    /// # Errors
    ///
    /// [`StorageError::CorruptIndex`] when the archive's persisted state
    /// cannot be read back (no partial data is served), and
    /// [`StorageError::Closed`] after `close()`.
    fn archive_for(&self, url: &str) -> Result<Arc<dyn FeedStorage>, StorageError>;

    /// All feed URLs with a counter row, sorted, whether or not their
    /// archive is currently materialized.
    fn feeds(&self) -> Vec<String>;

    fn unread_for(&self, url: &str) -> Option<i64>;
    fn set_unread_for(&self, url: &str, unread: i64);
    fn total_count_for(&self, url: &str) -> Option<i64>;
    fn set_total_count_for(&self, url: &str, total: i64);
    fn last_fetch_for(&self, url: &str) -> Option<DateTime<Utc>>;
    fn set_last_fetch_for(&self, url: &str, when: Option<DateTime<Utc>>);

    /// Overwrites the stored subscription list (OPML) wholesale.
    fn store_feed_list(&self, opml: &str);
    fn restore_feed_list(&self) -> Option<String>;

    /// Overwrites the stored tag set (XML) wholesale.
    fn store_tag_set(&self, xml: &str);
    fn restore_tag_set(&self) -> Option<String>;

    /// Whether `close()` commits outstanding changes.
    fn auto_commit(&self) -> bool;

    /// Flushes every cached archive, then the manager's own counters and
    /// blobs, as one commit unit.
    fn commit(&self) -> Result<(), StorageError>;

    /// Discards uncommitted changes in every cached archive and in the
    /// manager itself.
    fn rollback(&self) -> Result<(), StorageError>;

    /// Deletes all archives, counters and blobs.
    fn clear(&self) -> Result<(), StorageError>;

    /// Stops the background commit, commits when auto-commit is enabled,
    /// and releases all archives. Idempotent.
    fn close(&self) -> Result<(), StorageError>;

    /// Migrates every archive, counter row and blob from `source` into
    /// this storage. Used to move an installation between backends.
    fn add(&self, source: &dyn Storage) -> Result<(), StorageError> {
        for url in source.feeds() {
            tracing::debug!(url = %url, "migrating archive");
            let from = source.archive_for(&url)?;
            let to = self.archive_for(&url)?;
            to.add(from.as_ref());
        }
        if let Some(feed_list) = source.restore_feed_list() {
            self.store_feed_list(&feed_list);
        }
        if let Some(tag_set) = source.restore_tag_set() {
            self.store_tag_set(&tag_set);
        }
        Ok(())
    }
}

/// Reassembles a full [`Item`] from an archive row.
///
/// The inverse of scattering an item across the per-field setters: the
/// GUID becomes the item id, the single stored author and enclosure become
/// one-element lists, and absent fields stay at their defaults. Returns
/// `None` when the archive has no such article.
pub fn assemble_item(archive: &dyn FeedStorage, guid: &str) -> Option<Item> {
    if !archive.contains(guid) {
        return None;
    }
    let mut item = Item::new();
    item.set_id(guid);
    if let Some(title) = archive.title(guid) {
        item.set_title(title);
    }
    if let Some(description) = archive.description(guid) {
        item.set_description(description);
    }
    if let Some(content) = archive.content(guid) {
        item.set_content(content);
    }
    if let Some(link) = archive.link(guid) {
        item.set_link(link);
    }
    if let Some(author) = archive.author(guid) {
        if !author.is_empty() {
            item.set_authors(vec![author]);
        }
    }
    if let Some(count) = archive.comments(guid) {
        item.set_comments_count(count);
    }
    if let Some(link) = archive.comments_link(guid) {
        item.set_comments_link(link);
    }
    if let Some(status) = archive.status(guid) {
        item.set_status(status);
    }
    if let Some(date) = archive.pub_date(guid) {
        item.set_date_published(Some(date));
    }
    if let Some(hash) = archive.hash(guid) {
        item.set_hash(hash);
    }
    if let Some(is_hash) = archive.guid_is_hash(guid) {
        item.set_id_is_hash(is_hash);
    }
    if let Some(Some(enclosure)) = archive.enclosure(guid) {
        item.set_enclosures(vec![enclosure]);
    }
    if let Some(categories) = archive.categories(guid) {
        item.set_categories(categories);
    }
    Some(item)
}

/// Locks a mutex, recovering the data if a previous holder panicked.
/// Storage state stays usable because every critical section leaves it
/// structurally consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
