//! File naming inside a vault directory.
//!
//! Each feed archive is one file named after its URL; three fixed names
//! hold the counter index and the two blobs. Feed URLs map to names by
//! replacing path separators, with a hash-suffixed truncation for URLs
//! too long to be a file name.

use std::path::{Path, PathBuf};

use crate::util::content_hash;

pub(super) const INDEX_FILE: &str = "index.toml";
pub(super) const FEED_LIST_FILE: &str = "feedlist.opml";
pub(super) const TAG_SET_FILE: &str = "tagset.xml";

const ARCHIVE_SUFFIX: &str = ".atom";

/// Maps a feed URL to its archive file name: `/` and `:` become `_`, and
/// URLs longer than 255 bytes are cut to their first 200 bytes plus the
/// lowercase hex content hash of the full URL, so distinct long URLs keep
/// distinct files.
pub(super) fn feed_file_name(url: &str) -> String {
    let base = if url.len() > 255 {
        let mut end = 200;
        while !url.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}{:x}", &url[..end], content_hash(url))
    } else {
        url.to_string()
    };
    let mut name: String = base
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect();
    name.push_str(ARCHIVE_SUFFIX);
    name
}

pub(super) fn archive_file(root: &Path, url: &str) -> PathBuf {
    root.join(feed_file_name(url))
}

pub(super) fn index_file(root: &Path) -> PathBuf {
    root.join(INDEX_FILE)
}

pub(super) fn feed_list_file(root: &Path) -> PathBuf {
    root.join(FEED_LIST_FILE)
}

pub(super) fn tag_set_file(root: &Path) -> PathBuf {
    root.join(TAG_SET_FILE)
}

/// Whether a directory entry is one of ours, i.e. fair game for `clear()`.
pub(super) fn is_vault_file(name: &str) -> bool {
    name.ends_with(ARCHIVE_SUFFIX)
        || name == INDEX_FILE
        || name == FEED_LIST_FILE
        || name == TAG_SET_FILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators_become_underscores() {
        assert_eq!(
            feed_file_name("http://example.com/feed"),
            "http___example.com_feed.atom"
        );
    }

    #[test]
    fn test_short_url_is_kept_whole() {
        assert_eq!(feed_file_name("feed.xml"), "feed.xml.atom");
    }

    #[test]
    fn test_long_url_truncates_and_hashes() {
        let long_a = format!("http://example.com/{}", "a".repeat(300));
        let long_b = format!("http://example.com/{}", "b".repeat(300));

        let name_a = feed_file_name(&long_a);
        let name_b = feed_file_name(&long_b);

        // first 200 bytes survive, sanitized
        assert!(name_a.starts_with("http___example.com_aaaa"));
        assert!(name_a.ends_with(".atom"));
        // hash suffix + ".atom" on top of the 200 retained bytes
        assert!(name_a.len() <= 200 + 8 + ARCHIVE_SUFFIX.len());
        assert_ne!(name_a, name_b);
    }

    #[test]
    fn test_long_urls_differing_past_truncation_stay_distinct() {
        let prefix = "http://example.com/".to_string() + &"x".repeat(250);
        let url_a = format!("{}?page=1", prefix);
        let url_b = format!("{}?page=2", prefix);
        assert_ne!(feed_file_name(&url_a), feed_file_name(&url_b));
    }

    #[test]
    fn test_fixed_names() {
        let root = Path::new("/tmp/vault");
        assert_eq!(index_file(root), Path::new("/tmp/vault/index.toml"));
        assert_eq!(feed_list_file(root), Path::new("/tmp/vault/feedlist.opml"));
        assert_eq!(tag_set_file(root), Path::new("/tmp/vault/tagset.xml"));
        assert!(is_vault_file("index.toml"));
        assert!(is_vault_file("http___example.com_feed.atom"));
        assert!(!is_vault_file("notes.txt"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any URL, including multibyte text, maps to a name free of
            /// path separators and tagged as an archive file.
            #[test]
            fn prop_names_have_no_separators(url in ".{0,400}") {
                let name = feed_file_name(&url);
                prop_assert!(name.ends_with(ARCHIVE_SUFFIX));
                prop_assert!(!name.contains('/'));
                prop_assert!(!name.contains(':'));
                prop_assert!(is_vault_file(&name));
            }

            /// URLs past the 255-byte limit land well under it after
            /// truncation plus the 8-hex-digit hash suffix.
            #[test]
            fn prop_long_urls_map_to_bounded_names(url in ".{256,400}") {
                let name = feed_file_name(&url);
                prop_assert!(name.len() <= 200 + 8 + ARCHIVE_SUFFIX.len());
            }
        }
    }
}
