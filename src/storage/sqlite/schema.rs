//! Schema and connection setup for the SQLite backend.

use rusqlite::Connection;

/// Column defaults mirror the blank article: empty strings, status READ
/// (bit 0x4), counters at their sentinels.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS feed (
    id INTEGER PRIMARY KEY,
    url TEXT UNIQUE NOT NULL,
    unread INTEGER NOT NULL DEFAULT 0,
    total_count INTEGER NOT NULL DEFAULT 0,
    last_fetch INTEGER
);

CREATE TABLE IF NOT EXISTS article (
    feed_id INTEGER NOT NULL REFERENCES feed(id) ON DELETE CASCADE,
    guid TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL DEFAULT '',
    comments INTEGER NOT NULL DEFAULT -1,
    comments_link TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 4,
    pub_date INTEGER,
    hash INTEGER NOT NULL DEFAULT 0,
    guid_is_hash INTEGER NOT NULL DEFAULT 0,
    guid_is_permalink INTEGER NOT NULL DEFAULT 0,
    author_name TEXT NOT NULL DEFAULT '',
    author_uri TEXT NOT NULL DEFAULT '',
    author_email TEXT NOT NULL DEFAULT '',
    has_enclosure INTEGER NOT NULL DEFAULT 0,
    enclosure_url TEXT NOT NULL DEFAULT '',
    enclosure_title TEXT NOT NULL DEFAULT '',
    enclosure_type TEXT NOT NULL DEFAULT '',
    enclosure_length INTEGER NOT NULL DEFAULT 0,
    enclosure_duration INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (feed_id, guid)
);

CREATE TABLE IF NOT EXISTS article_category (
    feed_id INTEGER NOT NULL,
    guid TEXT NOT NULL,
    term TEXT NOT NULL,
    scheme TEXT NOT NULL DEFAULT '',
    label TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (feed_id, guid, term, scheme),
    FOREIGN KEY (feed_id, guid) REFERENCES article(feed_id, guid) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS blob_store (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    feed_list TEXT,
    tag_set TEXT
);

CREATE INDEX IF NOT EXISTS idx_article_feed ON article(feed_id);
";

/// Applies pragmas and creates the tables. Runs outside any transaction;
/// the journal-mode pragma cannot execute inside one.
pub(super) fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // journal_mode returns the resulting mode as a row ("wal", or "memory"
    // for in-memory databases), so it goes through query_row.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_twice() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('feed', 'article', 'article_category', 'blob_store')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_blank_article_matches_item_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        conn.execute("INSERT INTO feed (url) VALUES ('http://example.com')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO article (feed_id, guid) VALUES (1, 'a')",
            [],
        )
        .unwrap();

        let (comments, status, hash): (i64, u32, u32) = conn
            .query_row(
                "SELECT comments, status, hash FROM article WHERE guid = 'a'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(comments, -1);
        assert_eq!(status, crate::item::Status::READ.bits());
        assert_eq!(hash, 0);
    }
}
