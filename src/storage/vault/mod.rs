//! The vault backend: the default on-disk storage.
//!
//! One directory holds the whole store: an Atom file per feed archive, a
//! TOML counter index and two blob files (`feedlist.opml`, `tagset.xml`).
//! The files on disk are the committed state; every write goes through
//! [`atomic_write`](crate::util::atomic_write), so a crash mid-commit
//! leaves the previous generation intact.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::atomic_write;

use super::rows::CounterRow;
use super::scheduler::CommitScheduler;
use super::{lock, FeedStorage, Storage, StorageError, StorageFactory, StorageParams};

mod archive;
mod paths;

pub use archive::VaultFeedStorage;

/// On-disk shape of `index.toml`: one counter row per feed URL.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    feeds: BTreeMap<String, CounterRow>,
}

fn read_index(path: &Path) -> Result<BTreeMap<String, CounterRow>, StorageError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(StorageError::OpenFailed(format!(
                "{}: {}",
                path.display(),
                err
            )));
        }
    };
    let index: IndexFile = toml::from_str(&text)
        .map_err(|err| StorageError::CorruptIndex(format!("{}: {}", path.display(), err)))?;
    Ok(index.feeds)
}

fn read_blob(path: &Path) -> Result<Option<String>, StorageError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::OpenFailed(format!(
            "{}: {}",
            path.display(),
            err
        ))),
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    atomic_write(path, data)
        .map_err(|err| StorageError::WriteFailed(format!("{}: {}", path.display(), err)))
}

#[derive(Default)]
#[derive(Debug)]
struct ManagerState {
    counters: BTreeMap<String, CounterRow>,
    feed_list: Option<String>,
    tag_set: Option<String>,
    dirty: bool,
    closed: bool,
}

#[derive(Debug)]
struct VaultStorageInner {
    params: StorageParams,
    manager: Mutex<ManagerState>,
    archives: Mutex<BTreeMap<String, Arc<VaultFeedStorage>>>,
    scheduler: CommitScheduler,
}

/// The vault [`Storage`] implementation.
#[derive(Debug)]
pub struct VaultStorage {
    inner: Arc<VaultStorageInner>,
}

impl VaultStorage {
    /// Opens (creating if necessary) the vault rooted at
    /// `params.archive_path` and loads the counter index and blobs.
    ///
    /// # Errors
    ///
    /// [`StorageError::OpenFailed`] when the directory or its files cannot
    /// be read, [`StorageError::CorruptIndex`] when `index.toml` does not
    /// parse.
    pub fn open(params: StorageParams) -> Result<VaultStorage, StorageError> {
        std::fs::create_dir_all(&params.archive_path).map_err(|err| {
            StorageError::OpenFailed(format!("{}: {}", params.archive_path.display(), err))
        })?;
        let manager = ManagerState {
            counters: read_index(&paths::index_file(&params.archive_path))?,
            feed_list: read_blob(&paths::feed_list_file(&params.archive_path))?,
            tag_set: read_blob(&paths::tag_set_file(&params.archive_path))?,
            dirty: false,
            closed: false,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<VaultStorageInner>| {
            let weak = Weak::clone(weak);
            let scheduler = CommitScheduler::spawn(params.commit_interval, move || {
                if let Some(inner) = weak.upgrade() {
                    if let Err(err) = inner.commit_all() {
                        tracing::warn!(error = %err, "background commit failed");
                    }
                }
            });
            VaultStorageInner {
                params,
                manager: Mutex::new(manager),
                archives: Mutex::new(BTreeMap::new()),
                scheduler,
            }
        });
        tracing::debug!(
            path = %inner.params.archive_path.display(),
            feeds = lock(&inner.manager).counters.len(),
            "vault opened"
        );
        Ok(VaultStorage { inner })
    }
}

impl VaultStorageInner {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if lock(&self.manager).closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn auto_commit(&self) -> bool {
        self.params.auto_commit
    }

    /// Arms the debounced commit. Called after every mutation.
    fn touch(&self) {
        if self.params.auto_commit {
            self.scheduler.notify_dirty();
        }
    }

    fn counter<T>(&self, url: &str, read: impl FnOnce(&CounterRow) -> T) -> Option<T> {
        let manager = lock(&self.manager);
        manager.counters.get(url).map(read)
    }

    /// No-op when `url` has no counter row.
    fn update_counter(&self, url: &str, write: impl FnOnce(&mut CounterRow)) {
        let mut manager = lock(&self.manager);
        let Some(row) = manager.counters.get_mut(url) else {
            return;
        };
        write(row);
        manager.dirty = true;
        drop(manager);
        self.touch();
    }

    fn release_archive(&self, url: &str) {
        lock(&self.archives).remove(url);
    }

    /// One commit unit: every cached archive first, then the index and
    /// blobs. Clean archives and a clean manager write nothing.
    fn commit_all(&self) -> Result<(), StorageError> {
        let archives: Vec<Arc<VaultFeedStorage>> = lock(&self.archives).values().cloned().collect();
        for archive in archives {
            archive.commit()?;
        }
        self.commit_manager()
    }

    fn commit_manager(&self) -> Result<(), StorageError> {
        let mut manager = lock(&self.manager);
        if !manager.dirty {
            return Ok(());
        }
        let root = &self.params.archive_path;
        let index = IndexFile {
            feeds: manager.counters.clone(),
        };
        let text = toml::to_string_pretty(&index)
            .map_err(|err| StorageError::WriteFailed(err.to_string()))?;
        write_file(&paths::index_file(root), text.as_bytes())?;
        if let Some(feed_list) = &manager.feed_list {
            write_file(&paths::feed_list_file(root), feed_list.as_bytes())?;
        }
        if let Some(tag_set) = &manager.tag_set {
            write_file(&paths::tag_set_file(root), tag_set.as_bytes())?;
        }
        manager.dirty = false;
        Ok(())
    }

    /// Discards uncommitted counter and blob changes by re-reading the
    /// last committed files.
    fn rollback_manager(&self) -> Result<(), StorageError> {
        let mut manager = lock(&self.manager);
        if !manager.dirty {
            return Ok(());
        }
        let root = &self.params.archive_path;
        manager.counters = read_index(&paths::index_file(root))?;
        manager.feed_list = read_blob(&paths::feed_list_file(root))?;
        manager.tag_set = read_blob(&paths::tag_set_file(root))?;
        manager.dirty = false;
        Ok(())
    }
}

/// Dropping the last handle without `close()` still flushes under
/// auto-commit. Errors can only be logged here; callers that need to
/// observe them must close explicitly.
impl Drop for VaultStorageInner {
    fn drop(&mut self) {
        {
            if lock(&self.manager).closed {
                return;
            }
        }
        self.scheduler.stop();
        if self.params.auto_commit {
            if let Err(err) = self.commit_all() {
                tracing::warn!(error = %err, "commit on drop failed");
            }
        }
    }
}

impl Storage for VaultStorage {
    fn archive_for(&self, url: &str) -> Result<Arc<dyn FeedStorage>, StorageError> {
        self.inner.ensure_open()?;
        {
            let archives = lock(&self.inner.archives);
            if let Some(archive) = archives.get(url) {
                let archive = Arc::clone(archive);
                return Ok(archive);
            }
        }

        // Load outside both locks; a corrupt file fails here and is not
        // cached, so a repaired file can be picked up later.
        let path = paths::archive_file(&self.inner.params.archive_path, url);
        let rows = archive::load_rows(&path)?;

        let registered = {
            let mut manager = lock(&self.inner.manager);
            if manager.counters.contains_key(url) {
                false
            } else {
                manager
                    .counters
                    .insert(url.to_string(), CounterRow::default());
                manager.dirty = true;
                true
            }
        };
        if registered {
            self.inner.touch();
        }

        let fresh = Arc::new(VaultFeedStorage::new(
            url.to_string(),
            path,
            Arc::downgrade(&self.inner),
            rows,
        ));
        let mut archives = lock(&self.inner.archives);
        let archive = Arc::clone(archives.entry(url.to_string()).or_insert(fresh));
        Ok(archive)
    }

    fn feeds(&self) -> Vec<String> {
        let manager = lock(&self.inner.manager);
        manager.counters.keys().cloned().collect()
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
        manager.feed_list = Some(opml.to_string());
        manager.dirty = true;
        drop(manager);
        self.inner.touch();
    }

    fn restore_feed_list(&self) -> Option<String> {
        lock(&self.inner.manager).feed_list.clone()
    }

    fn store_tag_set(&self, xml: &str) {
        let mut manager = lock(&self.inner.manager);
        manager.tag_set = Some(xml.to_string());
        manager.dirty = true;
        drop(manager);
        self.inner.touch();
    }

    fn restore_tag_set(&self) -> Option<String> {
        lock(&self.inner.manager).tag_set.clone()
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
        let archives: Vec<Arc<VaultFeedStorage>> =
            lock(&self.inner.archives).values().cloned().collect();
        for archive in archives {
            archive.rollback()?;
        }
        self.inner.rollback_manager()
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.ensure_open()?;
        let archives: Vec<Arc<VaultFeedStorage>> = {
            let mut map = lock(&self.inner.archives);
            let archives = map.values().cloned().collect();
            map.clear();
            archives
        };
        for archive in archives {
            archive.forget();
        }
        {
            let mut manager = lock(&self.inner.manager);
            manager.counters.clear();
            manager.feed_list = None;
            manager.tag_set = None;
            manager.dirty = false;
        }

        let root = &self.inner.params.archive_path;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(StorageError::WriteFailed(format!(
                    "{}: {}",
                    root.display(),
                    err
                )));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::WriteFailed(err.to_string()))?;
            let name = entry.file_name();
            if !paths::is_vault_file(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    return Err(StorageError::WriteFailed(format!(
                        "{}: {}",
                        path.display(),
                        err
                    )));
                }
            }
        }
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
// Factory
// ============================================================================

/// Builds [`VaultStorage`] instances under the key `vault`.
pub struct VaultStorageFactory;

impl StorageFactory for VaultStorageFactory {
    fn key(&self) -> &'static str {
        "vault"
    }

    fn name(&self) -> &'static str {
        "file-per-feed archive"
    }

    fn create_storage(&self, params: &StorageParams) -> Result<Arc<dyn Storage>, StorageError> {
        let storage = VaultStorage::open(params.clone())?;
        Ok(Arc::new(storage))
    }
}
