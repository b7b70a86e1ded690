//! In-memory storage backend.
//!
//! Nothing here touches disk; committed state is just a second copy of the
//! working state. The backend still runs the full dirty/commit/rollback
//! machinery, and counts the commits that actually found dirty state
//! (`write_passes`), which is what the durability tests observe instead of
//! file writes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::item::{Category, Enclosure, Person, Status};

use super::rows::{ArticleRow, ArticleRows, CounterRow};
use super::scheduler::CommitScheduler;
use super::{lock, FeedStorage, Storage, StorageError, StorageFactory, StorageParams};

// ============================================================================
// Manager
// ============================================================================

/// Everything the manager owns besides the archives themselves. Committing
/// copies `working` into `committed`; rolling back copies it back.
#[derive(Debug, Clone, Default)]
struct ManagerSnapshot {
    counters: BTreeMap<String, CounterRow>,
    feed_list: Option<String>,
    tag_set: Option<String>,
}

#[derive(Default)]
struct ManagerState {
    working: ManagerSnapshot,
    committed: ManagerSnapshot,
    dirty: bool,
    closed: bool,
    write_passes: u64,
}

struct MemoryStorageInner {
    params: StorageParams,
    manager: Mutex<ManagerState>,
    archives: Mutex<BTreeMap<String, Arc<MemoryFeedStorage>>>,
    scheduler: CommitScheduler,
}

/// The in-memory [`Storage`] implementation.
pub struct MemoryStorage {
    inner: Arc<MemoryStorageInner>,
}

impl MemoryStorage {
    /// Opens an in-memory storage. `params.archive_path` is ignored; the
    /// commit interval and auto-commit flag work as in any other backend.
    pub fn open(params: StorageParams) -> Result<MemoryStorage, StorageError> {
        let inner = Arc::new_cyclic(|weak: &Weak<MemoryStorageInner>| {
            let weak = Weak::clone(weak);
            let scheduler = CommitScheduler::spawn(params.commit_interval, move || {
                if let Some(inner) = weak.upgrade() {
                    if let Err(err) = inner.commit_all() {
                        tracing::warn!(error = %err, "background commit failed");
                    }
                }
            });
            MemoryStorageInner {
                params,
                manager: Mutex::new(ManagerState::default()),
                archives: Mutex::new(BTreeMap::new()),
                scheduler,
            }
        });
        Ok(MemoryStorage { inner })
    }

    /// Concrete-typed variant of [`Storage::archive_for`], used by tests
    /// that need to reach [`MemoryFeedStorage::write_passes`].
    pub fn archive(&self, url: &str) -> Result<Arc<MemoryFeedStorage>, StorageError> {
        self.inner.ensure_open()?;

        {
            let archives = lock(&self.inner.archives);
            if let Some(archive) = archives.get(url) {
                return Ok(Arc::clone(archive));
            }
        }

        let registered = {
            let mut manager = lock(&self.inner.manager);
            if manager.working.counters.contains_key(url) {
                false
            } else {
                manager
                    .working
                    .counters
                    .insert(url.to_string(), CounterRow::default());
                manager.dirty = true;
                true
            }
        };
        if registered {
            self.inner.touch();
        }

        let fresh = Arc::new(MemoryFeedStorage {
            url: url.to_string(),
            owner: Arc::downgrade(&self.inner),
            state: Mutex::new(ArchiveState::default()),
        });
        let mut archives = lock(&self.inner.archives);
        let archive = archives.entry(url.to_string()).or_insert(fresh);
        Ok(Arc::clone(archive))
    }

    /// Number of manager-level commits that found dirty counters or blobs.
    pub fn write_passes(&self) -> u64 {
        lock(&self.inner.manager).write_passes
    }
}

impl MemoryStorageInner {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if lock(&self.manager).closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Arms the debounced commit. Called after every mutation.
    fn touch(&self) {
        if self.params.auto_commit {
            self.scheduler.notify_dirty();
        }
    }

    fn counter<T>(&self, url: &str, read: impl FnOnce(&CounterRow) -> T) -> Option<T> {
        let manager = lock(&self.manager);
        manager.working.counters.get(url).map(read)
    }

    /// No-op when `url` has no counter row.
    fn update_counter(&self, url: &str, write: impl FnOnce(&mut CounterRow)) {
        let mut manager = lock(&self.manager);
        let Some(row) = manager.working.counters.get_mut(url) else {
            return;
        };
        write(row);
        manager.dirty = true;
        drop(manager);
        self.touch();
    }

    /// One commit unit: every cached archive first, then the manager's own
    /// counters and blobs.
    fn commit_all(&self) -> Result<(), StorageError> {
        let archives: Vec<Arc<MemoryFeedStorage>> =
            lock(&self.archives).values().cloned().collect();
        for archive in archives {
            archive.commit()?;
        }
        let mut manager = lock(&self.manager);
        if manager.dirty {
            manager.committed = manager.working.clone();
            manager.dirty = false;
            manager.write_passes += 1;
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn archive_for(&self, url: &str) -> Result<Arc<dyn FeedStorage>, StorageError> {
        let archive = self.archive(url)?;
        Ok(archive)
    }

    fn feeds(&self) -> Vec<String> {
        let manager = lock(&self.inner.manager);
        manager.working.counters.keys().cloned().collect()
    }

    fn unread_for(&self, url: &str) -> Option<i64> {
        self.inner.counter(url, |row| row.unread)
    }

    fn set_unread_for(&self, url: &str, unread: i64) {
        self.inner.update_counter(url, |row| row.unread = unread);
    }

    fn total_count_for(&self, url: &str) -> Option<i64> {
        self.inner.counter(url, |row| row.total)
    }

    fn set_total_count_for(&self, url: &str, total: i64) {
        self.inner.update_counter(url, |row| row.total = total);
    }

    fn last_fetch_for(&self, url: &str) -> Option<DateTime<Utc>> {
        self.inner.counter(url, |row| row.last_fetch).flatten()
    }

    fn set_last_fetch_for(&self, url: &str, when: Option<DateTime<Utc>>) {
        self.inner.update_counter(url, |row| row.last_fetch = when);
    }

    fn store_feed_list(&self, opml: &str) {
        let mut manager = lock(&self.inner.manager);
        manager.working.feed_list = Some(opml.to_string());
        manager.dirty = true;
        drop(manager);
        self.inner.touch();
    }

    fn restore_feed_list(&self) -> Option<String> {
        lock(&self.inner.manager).working.feed_list.clone()
    }

    fn store_tag_set(&self, xml: &str) {
        let mut manager = lock(&self.inner.manager);
        manager.working.tag_set = Some(xml.to_string());
        manager.dirty = true;
        drop(manager);
        self.inner.touch();
    }

    fn restore_tag_set(&self) -> Option<String> {
        lock(&self.inner.manager).working.tag_set.clone()
    }

    fn auto_commit(&self) -> bool {
        self.inner.params.auto_commit
    }

    fn commit(&self) -> Result<(), StorageError> {
        self.inner.ensure_open()?;
        self.inner.commit_all()
    }

    fn rollback(&self) -> Result<(), StorageError> {
        self.inner.ensure_open()?;
        let archives: Vec<Arc<MemoryFeedStorage>> =
            lock(&self.inner.archives).values().cloned().collect();
        for archive in archives {
            archive.rollback()?;
        }
        let mut manager = lock(&self.inner.manager);
        if manager.dirty {
            manager.working = manager.committed.clone();
            manager.dirty = false;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.ensure_open()?;
        lock(&self.inner.archives).clear();
        let mut manager = lock(&self.inner.manager);
        manager.working = ManagerSnapshot::default();
        manager.committed = ManagerSnapshot::default();
        manager.dirty = false;
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        {
            let manager = lock(&self.inner.manager);
            if manager.closed {
                return Ok(());
            }
        }
        self.inner.scheduler.stop();
        if self.inner.params.auto_commit {
            self.inner.commit_all()?;
        }
        lock(&self.inner.manager).closed = true;
        lock(&self.inner.archives).clear();
        Ok(())
    }
}

// ============================================================================
// Archive
// ============================================================================

#[derive(Debug, Default)]
struct ArchiveState {
    working: ArticleRows,
    committed: ArticleRows,
    dirty: bool,
    write_passes: u64,
}

/// One feed's in-memory archive. Counters live with the owning manager;
/// everything else is a pair of [`ArticleRows`] tables (working and last
/// committed).
#[derive(Debug)]
pub struct MemoryFeedStorage {
    url: String,
    owner: Weak<MemoryStorageInner>,
    state: Mutex<ArchiveState>,
}

impl MemoryFeedStorage {
    /// Number of commits that found dirty state. A commit on a clean
    /// archive leaves this untouched.
    pub fn write_passes(&self) -> u64 {
        lock(&self.state).write_passes
    }

    fn with_row<T>(&self, guid: &str, read: impl FnOnce(&ArticleRow) -> T) -> Option<T> {
        let state = lock(&self.state);
        state.working.get(guid).map(read)
    }

    /// Applies `write` to the row and marks the archive dirty. No-op when
    /// the GUID is unknown.
    fn mutate(&self, guid: &str, write: impl FnOnce(&mut ArticleRow)) {
        let mut state = lock(&self.state);
        let Some(row) = state.working.get_mut(guid) else {
            return;
        };
        write(row);
        state.dirty = true;
        drop(state);
        self.touch();
    }

    fn touch(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.touch();
        }
    }
}

impl FeedStorage for MemoryFeedStorage {
    fn add_entry(&self, guid: &str) {
        let inserted = {
            let mut state = lock(&self.state);
            let inserted = state.working.insert(guid);
            state.dirty = true;
            inserted
        };
        if inserted {
            if let Some(owner) = self.owner.upgrade() {
                owner.update_counter(&self.url, |row| row.total += 1);
            }
        }
        self.touch();
    }

    fn contains(&self, guid: &str) -> bool {
        lock(&self.state).working.contains(guid)
    }

    fn delete_article(&self, guid: &str) {
        {
            let mut state = lock(&self.state);
            if !state.working.remove(guid) {
                return;
            }
            state.dirty = true;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.update_counter(&self.url, |row| row.total -= 1);
        }
        self.touch();
    }

    fn set_deleted(&self, guid: &str) {
        let mut state = lock(&self.state);
        if state.working.tombstone(guid) {
            state.dirty = true;
            drop(state);
            self.touch();
        }
    }

    fn clear(&self) {
        {
            let mut state = lock(&self.state);
            state.working.clear();
            state.dirty = true;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.update_counter(&self.url, |row| {
                row.unread = 0;
                row.total = 0;
            });
        }
        self.touch();
    }

    fn articles(&self) -> Vec<String> {
        lock(&self.state).working.guids()
    }

    fn unread(&self) -> i64 {
        self.owner
            .upgrade()
            .and_then(|owner| owner.counter(&self.url, |row| row.unread))
            .unwrap_or(0)
    }

    fn set_unread(&self, unread: i64) {
        if let Some(owner) = self.owner.upgrade() {
            owner.update_counter(&self.url, |row| row.unread = unread);
        }
    }

    fn total_count(&self) -> i64 {
        self.owner
            .upgrade()
            .and_then(|owner| owner.counter(&self.url, |row| row.total))
            .unwrap_or(0)
    }

    fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.owner
            .upgrade()
            .and_then(|owner| owner.counter(&self.url, |row| row.last_fetch))
            .flatten()
    }

    fn set_last_fetch(&self, when: Option<DateTime<Utc>>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.update_counter(&self.url, |row| row.last_fetch = when);
        }
    }

    fn title(&self, guid: &str) -> Option<String> {
        self.with_row(guid, |row| row.item.title().to_string())
    }

    fn set_title(&self, guid: &str, title: &str) {
        self.mutate(guid, |row| row.item.set_title(title));
    }

    fn description(&self, guid: &str) -> Option<String> {
        self.with_row(guid, |row| row.item.description().to_string())
    }

    fn set_description(&self, guid: &str, description: &str) {
        self.mutate(guid, |row| row.item.set_description(description));
    }

    fn content(&self, guid: &str) -> Option<String> {
        self.with_row(guid, |row| row.item.content().to_string())
    }

    fn set_content(&self, guid: &str, content: &str) {
        self.mutate(guid, |row| row.item.set_content(content));
    }

    fn link(&self, guid: &str) -> Option<String> {
        self.with_row(guid, |row| row.item.link().to_string())
    }

    fn set_link(&self, guid: &str, link: &str) {
        self.mutate(guid, |row| row.item.set_link(link));
    }

    fn author(&self, guid: &str) -> Option<Person> {
        self.with_row(guid, |row| {
            row.item.authors().first().cloned().unwrap_or_default()
        })
    }

    fn set_author(&self, guid: &str, author: &Person) {
        self.mutate(guid, |row| row.item.set_authors(vec![author.clone()]));
    }

    fn comments(&self, guid: &str) -> Option<i64> {
        self.with_row(guid, |row| row.item.comments_count())
    }

    fn set_comments(&self, guid: &str, count: i64) {
        self.mutate(guid, |row| row.item.set_comments_count(count));
    }

    fn comments_link(&self, guid: &str) -> Option<String> {
        self.with_row(guid, |row| row.item.comments_link().to_string())
    }

    fn set_comments_link(&self, guid: &str, link: &str) {
        self.mutate(guid, |row| row.item.set_comments_link(link));
    }

    fn status(&self, guid: &str) -> Option<Status> {
        self.with_row(guid, |row| row.item.status())
    }

    fn set_status(&self, guid: &str, status: Status) {
        self.mutate(guid, |row| row.item.set_status(status));
    }

    fn pub_date(&self, guid: &str) -> Option<DateTime<Utc>> {
        self.with_row(guid, |row| row.item.date_published()).flatten()
    }

    fn set_pub_date(&self, guid: &str, date: Option<DateTime<Utc>>) {
        self.mutate(guid, |row| row.item.set_date_published(date));
    }

    fn hash(&self, guid: &str) -> Option<u32> {
        self.with_row(guid, |row| row.item.hash())
    }

    fn set_hash(&self, guid: &str, hash: u32) {
        self.mutate(guid, |row| row.item.set_hash(hash));
    }

    fn guid_is_hash(&self, guid: &str) -> Option<bool> {
        self.with_row(guid, |row| row.item.id_is_hash())
    }

    fn set_guid_is_hash(&self, guid: &str, is_hash: bool) {
        self.mutate(guid, |row| row.item.set_id_is_hash(is_hash));
    }

    fn guid_is_permalink(&self, guid: &str) -> Option<bool> {
        self.with_row(guid, |row| row.guid_is_permalink)
    }

    fn set_guid_is_permalink(&self, guid: &str, is_permalink: bool) {
        self.mutate(guid, |row| row.guid_is_permalink = is_permalink);
    }

    fn enclosure(&self, guid: &str) -> Option<Option<Enclosure>> {
        self.with_row(guid, |row| row.item.enclosures().first().cloned())
    }

    fn set_enclosure(&self, guid: &str, enclosure: &Enclosure) {
        self.mutate(guid, |row| {
            row.item.set_enclosures(vec![enclosure.clone()]);
        });
    }

    fn remove_enclosure(&self, guid: &str) {
        self.mutate(guid, |row| row.item.set_enclosures(Vec::new()));
    }

    fn categories(&self, guid: &str) -> Option<Vec<Category>> {
        self.with_row(guid, |row| row.item.categories().to_vec())
    }

    fn add_category(&self, guid: &str, category: &Category) {
        self.mutate(guid, |row| {
            let mut categories = row.item.categories().to_vec();
            let present = categories
                .iter()
                .any(|c| c.term == category.term && c.scheme == category.scheme);
            if !present {
                categories.push(category.clone());
                row.item.set_categories(categories);
            }
        });
    }

    fn is_dirty(&self) -> bool {
        lock(&self.state).dirty
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if !state.dirty {
            return Ok(());
        }
        state.committed = state.working.clone();
        state.dirty = false;
        state.write_passes += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if state.dirty {
            state.working = state.committed.clone();
            state.dirty = false;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        let auto = self
            .owner
            .upgrade()
            .map(|owner| owner.params.auto_commit)
            .unwrap_or(false);
        if auto {
            self.commit()?;
        }
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds [`MemoryStorage`] instances under the key `memory`.
pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    fn key(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &'static str {
        "transient in-memory archive"
    }

    fn create_storage(&self, params: &StorageParams) -> Result<Arc<dyn Storage>, StorageError> {
        let storage = MemoryStorage::open(params.clone())?;
        Ok(Arc::new(storage))
    }
}
