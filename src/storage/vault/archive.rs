//! One feed's on-disk archive: an Atom feed document holding every
//! archived article of that feed.
//!
//! The file on disk is the committed state. Mutations touch only the
//! in-memory row table and mark it dirty; `commit()` rewrites the whole
//! file atomically, `rollback()` re-reads it.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::item::{read_feed_entries, write_feed};
use crate::item::{Category, Enclosure, Item, Person, Status};
use crate::util::atomic_write;

use super::super::rows::{ArticleRow, ArticleRows};
use super::super::{lock, FeedStorage, StorageError};
use super::VaultStorageInner;

/// Reserved custom property that carries the per-row permalink flag
/// through the Atom file. Written only when the flag is set; stripped
/// again on load so it never surfaces as a real custom property.
pub(super) const GUID_IS_PERMALINK_PROPERTY: &str = "feedvault:guidIsPermaLink";

/// Reads an archive file back into a row table. A missing file is an
/// empty archive; an unreadable or unparseable one fails closed.
pub(super) fn load_rows(path: &Path) -> Result<ArticleRows, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ArticleRows::default());
        }
        Err(err) => {
            return Err(StorageError::OpenFailed(format!(
                "{}: {}",
                path.display(),
                err
            )));
        }
    };
    let items = read_feed_entries(&bytes)
        .map_err(|err| StorageError::CorruptIndex(format!("{}: {}", path.display(), err)))?;

    let mut rows = ArticleRows::default();
    for mut item in items {
        let guid_is_permalink = item.custom_property(GUID_IS_PERMALINK_PROPERTY) == Some("true");
        item.remove_custom_property(GUID_IS_PERMALINK_PROPERTY);
        rows.insert_row(ArticleRow {
            item,
            guid_is_permalink,
        });
    }
    Ok(rows)
}

fn render_rows(rows: &ArticleRows) -> Result<Vec<u8>, StorageError> {
    let mut items: Vec<Item> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let mut item = row.item.clone();
        if row.guid_is_permalink {
            item.set_custom_property(GUID_IS_PERMALINK_PROPERTY, "true");
        }
        items.push(item);
    }
    write_feed(&items).map_err(|err| StorageError::WriteFailed(err.to_string()))
}

#[derive(Debug)]
struct ArchiveState {
    rows: ArticleRows,
    dirty: bool,
}

/// The vault [`FeedStorage`]: one Atom file per feed, counters delegated
/// to the owning manager's index.
#[derive(Debug)]
pub struct VaultFeedStorage {
    url: String,
    path: PathBuf,
    owner: Weak<VaultStorageInner>,
    state: Mutex<ArchiveState>,
}

impl VaultFeedStorage {
    pub(super) fn new(
        url: String,
        path: PathBuf,
        owner: Weak<VaultStorageInner>,
        rows: ArticleRows,
    ) -> VaultFeedStorage {
        VaultFeedStorage {
            url,
            path,
            owner,
            state: Mutex::new(ArchiveState { rows, dirty: false }),
        }
    }

    /// Drops all rows without touching the file. Used by `clear()`, which
    /// deletes the files wholesale.
    pub(super) fn forget(&self) {
        let mut state = lock(&self.state);
        state.rows.clear();
        state.dirty = false;
    }

    fn with_row<T>(&self, guid: &str, read: impl FnOnce(&ArticleRow) -> T) -> Option<T> {
        let state = lock(&self.state);
        state.rows.get(guid).map(read)
    }

    /// Applies `write` to the row and marks the archive dirty. No-op when
    /// the GUID is unknown.
    fn mutate(&self, guid: &str, write: impl FnOnce(&mut ArticleRow)) {
        let mut state = lock(&self.state);
        let Some(row) = state.rows.get_mut(guid) else {
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

impl FeedStorage for VaultFeedStorage {
    fn add_entry(&self, guid: &str) {
        let inserted = {
            let mut state = lock(&self.state);
            let inserted = state.rows.insert(guid);
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
        lock(&self.state).rows.contains(guid)
    }

    fn delete_article(&self, guid: &str) {
        {
            let mut state = lock(&self.state);
            if !state.rows.remove(guid) {
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
        if state.rows.tombstone(guid) {
            state.dirty = true;
            drop(state);
            self.touch();
        }
    }

    fn clear(&self) {
        {
            let mut state = lock(&self.state);
            state.rows.clear();
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
        lock(&self.state).rows.guids()
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
        let bytes = render_rows(&state.rows)?;
        atomic_write(&self.path, &bytes).map_err(|err| {
            StorageError::WriteFailed(format!("{}: {}", self.path.display(), err))
        })?;
        state.dirty = false;
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if !state.dirty {
            return Ok(());
        }
        state.rows = load_rows(&self.path)?;
        state.dirty = false;
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        if let Some(owner) = self.owner.upgrade() {
            if owner.auto_commit() {
                self.commit()?;
            }
            owner.release_archive(&self.url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str) -> Item {
        let mut item = Item::new();
        item.set_id(id);
        item.set_title(title);
        item
    }

    #[test]
    fn test_permalink_flag_rides_a_reserved_property() {
        let mut rows = ArticleRows::default();
        rows.insert_row(ArticleRow {
            item: item("a", "flagged"),
            guid_is_permalink: true,
        });
        rows.insert_row(ArticleRow {
            item: item("b", "plain"),
            guid_is_permalink: false,
        });

        let bytes = render_rows(&rows).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("feedvault:guidIsPermaLink"));

        let dir = std::env::temp_dir().join(format!(
            "feedvault_archive_permalink_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.atom");
        std::fs::write(&path, &bytes).unwrap();

        let loaded = load_rows(&path).unwrap();
        let a = loaded.get("a").unwrap();
        assert!(a.guid_is_permalink);
        // stripped on load, not a visible custom property
        assert_eq!(a.item.custom_property(GUID_IS_PERMALINK_PROPERTY), None);
        assert!(!loaded.get("b").unwrap().guid_is_permalink);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let path = std::env::temp_dir().join(format!(
            "feedvault_archive_missing_{}.atom",
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();
        let rows = load_rows(&path).unwrap();
        assert_eq!(rows.len(), 0);
    }

    #[test]
    fn test_damaged_file_fails_closed() {
        let dir = std::env::temp_dir().join(format!(
            "feedvault_archive_damaged_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feed.atom");
        std::fs::write(&path, b"<feed><entry>truncated").unwrap();

        let err = load_rows(&path).unwrap_err();
        assert!(matches!(err, StorageError::CorruptIndex(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
