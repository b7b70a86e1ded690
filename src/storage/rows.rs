//! In-memory row primitives shared by the vault and memory backends: the
//! per-feed counter row and the ordered, GUID-indexed article table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::Item;

/// Per-feed counters kept by the storage manager, keyed by feed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CounterRow {
    /// Number of unread articles.
    #[serde(default)]
    pub unread: i64,
    /// Number of archived articles.
    #[serde(default)]
    pub total: i64,
    /// When the feed was last fetched, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<DateTime<Utc>>,
}

/// One archived article. The item's `id` is the row's GUID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ArticleRow {
    pub item: Item,
    /// Whether the GUID doubles as a permalink. Not an [`Item`] field;
    /// persisted separately by each backend.
    pub guid_is_permalink: bool,
}

impl ArticleRow {
    fn blank(guid: &str) -> ArticleRow {
        let mut row = ArticleRow::default();
        row.item.set_id(guid);
        row
    }
}

/// An ordered article table with O(1) average GUID lookup.
///
/// Rows keep their insertion order (which is what `articles()` exposes);
/// the side index maps GUID to position and is maintained through every
/// mutation.
#[derive(Debug, Clone, Default)]
pub(crate) struct ArticleRows {
    rows: Vec<ArticleRow>,
    index: HashMap<String, usize>,
}

impl ArticleRows {
    /// Inserts a blank row for `guid`. Returns false (and leaves the
    /// table unchanged) when the GUID is already present.
    pub fn insert(&mut self, guid: &str) -> bool {
        if self.index.contains_key(guid) {
            return false;
        }
        self.index.insert(guid.to_string(), self.rows.len());
        self.rows.push(ArticleRow::blank(guid));
        true
    }

    /// Inserts a fully formed row, replacing any existing row with the
    /// same GUID in place. Used when loading persisted archives.
    pub fn insert_row(&mut self, row: ArticleRow) {
        let guid = row.item.id().to_string();
        match self.index.get(&guid) {
            Some(&at) => self.rows[at] = row,
            None => {
                self.index.insert(guid, self.rows.len());
                self.rows.push(row);
            }
        }
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.index.contains_key(guid)
    }

    /// Removes the row for `guid`, preserving the order of the remaining
    /// rows. Returns whether a row was removed.
    pub fn remove(&mut self, guid: &str) -> bool {
        let Some(at) = self.index.remove(guid) else {
            return false;
        };
        self.rows.remove(at);
        for position in self.index.values_mut() {
            if *position > at {
                *position -= 1;
            }
        }
        true
    }

    /// Blanks the row's descriptive fields in place: title, description,
    /// content, link, authors and comments link. GUID, status and dates
    /// survive. Returns whether a row was found.
    pub fn tombstone(&mut self, guid: &str) -> bool {
        let Some(row) = self.get_mut(guid) else {
            return false;
        };
        row.item.set_title("");
        row.item.set_description("");
        row.item.set_content("");
        row.item.set_link("");
        row.item.set_authors(Vec::new());
        row.item.set_comments_link("");
        true
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.index.clear();
    }

    pub fn get(&self, guid: &str) -> Option<&ArticleRow> {
        self.index.get(guid).map(|&at| &self.rows[at])
    }

    pub fn get_mut(&mut self, guid: &str) -> Option<&mut ArticleRow> {
        let at = *self.index.get(guid)?;
        Some(&mut self.rows[at])
    }

    /// All GUIDs in row order.
    pub fn guids(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.item.id().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArticleRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Status;

    #[test]
    fn test_insert_is_idempotent_on_guid() {
        let mut rows = ArticleRows::default();
        assert!(rows.insert("a"));
        assert!(!rows.insert("a"));
        assert_eq!(rows.len(), 1);
        assert!(rows.contains("a"));
    }

    #[test]
    fn test_remove_preserves_order_and_index() {
        let mut rows = ArticleRows::default();
        rows.insert("a");
        rows.insert("b");
        rows.insert("c");

        assert!(rows.remove("b"));
        assert!(!rows.remove("b"));
        assert_eq!(rows.guids(), vec!["a", "c"]);

        // The index must have been shifted down past the removed row.
        rows.get_mut("c").unwrap().item.set_title("still c");
        assert_eq!(rows.get("c").unwrap().item.title(), "still c");
        assert_eq!(rows.get("a").unwrap().item.title(), "");
    }

    #[test]
    fn test_tombstone_keeps_identity_fields() {
        let mut rows = ArticleRows::default();
        rows.insert("a");
        {
            let row = rows.get_mut("a").unwrap();
            row.item.set_title("title");
            row.item.set_description("desc");
            row.item.set_status(Status::UNREAD | Status::IMPORTANT);
        }

        assert!(rows.tombstone("a"));
        let row = rows.get("a").unwrap();
        assert_eq!(row.item.id(), "a");
        assert_eq!(row.item.title(), "");
        assert_eq!(row.item.description(), "");
        assert_eq!(row.item.content(), "");
        assert_eq!(row.item.status(), Status::UNREAD | Status::IMPORTANT);
        assert!(rows.contains("a"));
    }

    #[test]
    fn test_insert_row_replaces_in_place() {
        let mut rows = ArticleRows::default();
        rows.insert("a");
        rows.insert("b");

        let mut replacement = ArticleRow::default();
        replacement.item.set_id("a");
        replacement.item.set_title("replaced");
        replacement.guid_is_permalink = true;
        rows.insert_row(replacement);

        assert_eq!(rows.guids(), vec!["a", "b"]);
        assert_eq!(rows.get("a").unwrap().item.title(), "replaced");
        assert!(rows.get("a").unwrap().guid_is_permalink);
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut rows = ArticleRows::default();
        rows.insert("a");
        rows.insert("b");
        rows.clear();
        assert_eq!(rows.len(), 0);
        assert!(!rows.contains("a"));
        assert!(rows.guids().is_empty());
    }
}
