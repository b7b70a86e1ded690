use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::Status;
use crate::util::{content_hash, derived_id};

// ============================================================================
// Sub-types
// ============================================================================

/// An author attached to an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub uri: String,
    pub email: String,
}

impl Person {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.uri.is_empty() && self.email.is_empty()
    }
}

/// A linked media file (podcast audio, video, ...) attached to an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub title: String,
    /// MIME type, e.g. "audio/mpeg".
    pub mime_type: String,
    /// Size in bytes. Zero when the feed did not supply one.
    pub length: u32,
    /// Playing time in seconds. Zero when unknown.
    pub duration: u32,
}

/// A category assigned to an item (Atom term/scheme/label triple).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Category {
    pub term: String,
    pub scheme: String,
    pub label: String,
}

// ============================================================================
// Item
// ============================================================================

/// In-memory representation of a single syndication item.
///
/// `Item` is a plain value type: cloning yields an independent deep copy and
/// equality is structural over every stored field. Setters accept any value;
/// an empty string, empty list or `None` date means "unset". There are no
/// error paths.
///
/// Two getters have documented fallbacks, matching the serialization
/// format's omission rules:
///
/// - [`content`](Item::content) returns the description while no content is
///   set ("if not specified, description is used")
/// - [`date_updated`](Item::date_updated) returns the published date while
///   no updated date is set
///
/// Defaults for the scalar metadata fields are *not* all zero: a fresh item
/// has status [`Status::READ`], a comments count of -1 and a source feed id
/// of -1, which is what the wire format omits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    id: String,
    title: String,
    link: String,
    description: String,
    content: String,
    date_published: Option<DateTime<Utc>>,
    date_updated: Option<DateTime<Utc>>,
    language: String,
    authors: Vec<Person>,
    enclosures: Vec<Enclosure>,
    categories: Vec<Category>,
    comments_count: i64,
    comments_link: String,
    comments_feed: String,
    comment_post_uri: String,
    status: Status,
    id_is_hash: bool,
    hash: u32,
    source_feed_id: i64,
    custom_properties: BTreeMap<String, String>,
}

impl Default for Item {
    fn default() -> Item {
        Item {
            id: String::new(),
            title: String::new(),
            link: String::new(),
            description: String::new(),
            content: String::new(),
            date_published: None,
            date_updated: None,
            language: String::new(),
            authors: Vec::new(),
            enclosures: Vec::new(),
            categories: Vec::new(),
            comments_count: -1,
            comments_link: String::new(),
            comments_feed: String::new(),
            comment_post_uri: String::new(),
            status: Status::READ,
            id_is_hash: false,
            hash: 0,
            source_feed_id: -1,
            custom_properties: BTreeMap::new(),
        }
    }
}

impl Item {
    /// Creates an item with all fields at their defaults.
    pub fn new() -> Item {
        Item::default()
    }

    /// The item's unique identifier within its feed.
    ///
    /// Either supplied by the feed or derived via [`Item::assign_derived_id`],
    /// in which case it starts with `"hash:"` and [`id_is_hash`](Item::id_is_hash)
    /// is true.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn set_link(&mut self, link: impl Into<String>) {
        self.link = link.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// The full content. Falls back to the description while unset.
    pub fn content(&self) -> &str {
        if self.content.is_empty() {
            &self.description
        } else {
            &self.content
        }
    }

    /// Sets the content. Passing an empty string restores the
    /// description fallback.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    /// The publication date, if the feed supplied one.
    pub fn date_published(&self) -> Option<DateTime<Utc>> {
        self.date_published
    }

    pub fn set_date_published(&mut self, date: Option<DateTime<Utc>>) {
        self.date_published = date;
    }

    /// The last-modified date. Falls back to the published date while unset.
    pub fn date_updated(&self) -> Option<DateTime<Utc>> {
        self.date_updated.or(self.date_published)
    }

    pub fn set_date_updated(&mut self, date: Option<DateTime<Utc>>) {
        self.date_updated = date;
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    pub fn authors(&self) -> &[Person] {
        &self.authors
    }

    pub fn set_authors(&mut self, authors: Vec<Person>) {
        self.authors = authors;
    }

    pub fn enclosures(&self) -> &[Enclosure] {
        &self.enclosures
    }

    pub fn set_enclosures(&mut self, enclosures: Vec<Enclosure>) {
        self.enclosures = enclosures;
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn set_categories(&mut self, categories: Vec<Category>) {
        self.categories = categories;
    }

    /// Number of comments, or -1 when unknown.
    pub fn comments_count(&self) -> i64 {
        self.comments_count
    }

    pub fn set_comments_count(&mut self, count: i64) {
        self.comments_count = count;
    }

    /// URL of the comments page.
    pub fn comments_link(&self) -> &str {
        &self.comments_link
    }

    pub fn set_comments_link(&mut self, link: impl Into<String>) {
        self.comments_link = link.into();
    }

    /// URL of a feed syndicating the comments on this item.
    pub fn comments_feed(&self) -> &str {
        &self.comments_feed
    }

    pub fn set_comments_feed(&mut self, feed: impl Into<String>) {
        self.comments_feed = feed.into();
    }

    /// URI for posting comments via the Comment API.
    pub fn comment_post_uri(&self) -> &str {
        &self.comment_post_uri
    }

    pub fn set_comment_post_uri(&mut self, uri: impl Into<String>) {
        self.comment_post_uri = uri.into();
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// True when the id was derived from the item's content rather than
    /// supplied by the feed.
    pub fn id_is_hash(&self) -> bool {
        self.id_is_hash
    }

    pub fn set_id_is_hash(&mut self, is_hash: bool) {
        self.id_is_hash = is_hash;
    }

    /// Content hash used for change detection across re-fetches.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn set_hash(&mut self, hash: u32) {
        self.hash = hash;
    }

    /// Identifier of the feed this item was copied from, or -1.
    pub fn source_feed_id(&self) -> i64 {
        self.source_feed_id
    }

    pub fn set_source_feed_id(&mut self, id: i64) {
        self.source_feed_id = id;
    }

    /// All custom key/value properties, in key order.
    pub fn custom_properties(&self) -> &BTreeMap<String, String> {
        &self.custom_properties
    }

    pub fn custom_property(&self, key: &str) -> Option<&str> {
        self.custom_properties.get(key).map(String::as_str)
    }

    pub fn set_custom_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_properties.insert(key.into(), value.into());
    }

    pub fn remove_custom_property(&mut self, key: &str) {
        self.custom_properties.remove(key);
    }

    /// Recomputes the content hash over title, description and content.
    pub fn refresh_hash(&mut self) {
        let mut buf =
            String::with_capacity(self.title.len() + self.description.len() + self.content.len());
        buf.push_str(&self.title);
        buf.push_str(&self.description);
        buf.push_str(&self.content);
        self.hash = content_hash(&buf);
    }

    /// Assigns a deterministic `"hash:"`-prefixed id derived from title,
    /// description and content, and records the provenance in
    /// [`id_is_hash`](Item::id_is_hash).
    ///
    /// Intended for items whose feed supplied no usable identifier; the
    /// derived id is stable across re-fetches as long as the content is.
    pub fn assign_derived_id(&mut self) {
        self.id = derived_id(&self.title, &self.description, &self.content);
        self.id_is_hash = true;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_default_values() {
        let item = Item::new();
        assert_eq!(item.comments_count(), -1);
        assert_eq!(item.status(), Status::READ);
        assert!(!item.id_is_hash());
        assert_eq!(item.source_feed_id(), -1);
        assert_eq!(item.hash(), 0);
        assert!(item.custom_properties().is_empty());
    }

    #[test]
    fn test_null_dates() {
        let item = Item::new();
        assert!(item.date_published().is_none());
        assert!(item.date_updated().is_none());
    }

    #[test]
    fn test_single_null_dates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();

        let mut item1 = Item::new();
        item1.set_date_updated(Some(now));
        assert!(item1.date_published().is_none());
        assert_eq!(item1.date_updated(), Some(now));

        // date_updated() must return date_published() if no updated date is set
        let mut item2 = Item::new();
        item2.set_date_published(Some(now));
        assert_eq!(item2.date_published(), Some(now));
        assert_eq!(item2.date_updated(), item2.date_published());

        let tomorrow = now + Duration::days(1);
        item2.set_date_published(Some(tomorrow));
        assert_eq!(item2.date_published(), Some(tomorrow));
        assert_eq!(item2.date_updated(), item2.date_published());
    }

    #[test]
    fn test_content_falls_back_to_description() {
        // content() must return description() if no content is set
        let desc1 = "Hello! I'm a description!";
        let desc2 = "Hello! I'm another description!";
        let content = "Hi there. Content is king!";

        let mut item = Item::new();
        item.set_description(desc1);
        assert_eq!(item.description(), desc1);
        assert_eq!(item.content(), desc1);

        item.set_content(content);
        assert_eq!(item.description(), desc1);
        assert_eq!(item.content(), content);

        item.set_content("");
        assert_eq!(item.description(), desc1);
        assert_eq!(item.content(), desc1);

        item.set_description(desc2);
        item.set_content(content);
        assert_eq!(item.description(), desc2);
        assert_eq!(item.content(), content);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = Item::new();
        a.set_title("original");
        let mut b = a.clone();
        b.set_title("changed");
        assert_eq!(a.title(), "original");
        assert_eq!(b.title(), "changed");
    }

    #[test]
    fn test_structural_equality() {
        let mut a = Item::new();
        let mut b = Item::new();
        assert_eq!(a, b);

        a.set_title("t");
        assert_ne!(a, b);
        b.set_title("t");
        assert_eq!(a, b);

        a.set_status(Status::UNREAD | Status::IMPORTANT);
        assert_ne!(a, b);
        b.set_status(Status::UNREAD | Status::IMPORTANT);
        assert_eq!(a, b);
    }

    #[test]
    fn test_assign_derived_id() {
        let mut item = Item::new();
        item.set_title("Some title");
        item.set_description("Some description");
        item.assign_derived_id();

        assert!(item.id().starts_with("hash:"));
        assert!(item.id_is_hash());

        // Stable across items with identical content.
        let mut other = Item::new();
        other.set_title("Some title");
        other.set_description("Some description");
        other.assign_derived_id();
        assert_eq!(item.id(), other.id());
    }

    #[test]
    fn test_refresh_hash_tracks_content() {
        let mut item = Item::new();
        item.set_title("a");
        item.refresh_hash();
        let first = item.hash();
        assert_ne!(first, 0);

        item.set_title("b");
        item.refresh_hash();
        assert_ne!(item.hash(), first);
    }

    #[test]
    fn test_custom_properties_are_ordered() {
        let mut item = Item::new();
        item.set_custom_property("zebra", "1");
        item.set_custom_property("alpha", "2");
        let keys: Vec<&str> = item.custom_properties().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpha", "zebra"]);

        item.remove_custom_property("alpha");
        assert!(item.custom_property("alpha").is_none());
        assert_eq!(item.custom_property("zebra"), Some("1"));
    }
}
