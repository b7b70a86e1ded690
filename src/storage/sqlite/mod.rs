//! SQLite storage backend.
//!
//! One database file (`feedvault.db` under the archive path, or an
//! in-memory database when the path is `:memory:`), one connection, and a
//! transaction that is always open: setters execute their SQL immediately
//! inside it, `commit()` runs `COMMIT; BEGIN`, `rollback()` runs
//! `ROLLBACK; BEGIN`. A setter whose SQL fails records the error; the next
//! `commit()` discards the damaged unit and surfaces that first failure as
//! [`StorageError::WriteFailed`], so nothing is lost silently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::item::{Category, Enclosure, Person, Status};

use super::scheduler::CommitScheduler;
use super::{lock, FeedStorage, Storage, StorageError, StorageFactory, StorageParams};

mod schema;

fn database_path(params: &StorageParams) -> Option<PathBuf> {
    if params.archive_path == Path::new(":memory:") {
        None
    } else {
        Some(params.archive_path.join("feedvault.db"))
    }
}

struct DbState {
    conn: Connection,
    /// Whether the open transaction holds uncommitted changes.
    dirty: bool,
    /// First setter failure inside the current transaction, surfaced by
    /// the next commit.
    failure: Option<String>,
    closed: bool,
}

struct SqliteStorageInner {
    params: StorageParams,
    db: Mutex<DbState>,
    archives: Mutex<BTreeMap<String, Arc<SqliteFeedStorage>>>,
    scheduler: CommitScheduler,
}

/// The SQLite [`Storage`] implementation.
pub struct SqliteStorage {
    inner: Arc<SqliteStorageInner>,
}

impl SqliteStorage {
    /// Opens (creating if necessary) the database under
    /// `params.archive_path` and starts the long-lived transaction.
    pub fn open(params: StorageParams) -> Result<SqliteStorage, StorageError> {
        let conn = match database_path(&params) {
            None => Connection::open_in_memory()
                .map_err(|err| StorageError::OpenFailed(err.to_string()))?,
            Some(path) => {
                std::fs::create_dir_all(&params.archive_path).map_err(|err| {
                    StorageError::OpenFailed(format!(
                        "{}: {}",
                        params.archive_path.display(),
                        err
                    ))
                })?;
                Connection::open(&path).map_err(|err| {
                    StorageError::OpenFailed(format!("{}: {}", path.display(), err))
                })?
            }
        };
        schema::init(&conn).map_err(|err| StorageError::OpenFailed(err.to_string()))?;
        conn.execute_batch("BEGIN")
            .map_err(|err| StorageError::OpenFailed(err.to_string()))?;

        let inner = Arc::new_cyclic(|weak: &Weak<SqliteStorageInner>| {
            let weak = Weak::clone(weak);
            let scheduler = CommitScheduler::spawn(params.commit_interval, move || {
                if let Some(inner) = weak.upgrade() {
                    if let Err(err) = inner.commit_all() {
                        tracing::warn!(error = %err, "background commit failed");
                    }
                }
            });
            SqliteStorageInner {
                params,
                db: Mutex::new(DbState {
                    conn,
                    dirty: false,
                    failure: None,
                    closed: false,
                }),
                archives: Mutex::new(BTreeMap::new()),
                scheduler,
            }
        });
        Ok(SqliteStorage { inner })
    }
}

impl SqliteStorageInner {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if lock(&self.db).closed {
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

    /// Executes a write inside the open transaction, returning the number
    /// of affected rows. Failures are recorded for the next commit and
    /// count as zero rows.
    fn run(&self, sql: &str, params: impl rusqlite::Params) -> usize {
        let mut db = lock(&self.db);
        match db.conn.execute(sql, params) {
            Ok(count) => {
                if count > 0 {
                    db.dirty = true;
                }
                count
            }
            Err(err) => {
                tracing::warn!(error = %err, sql, "storage write failed");
                if db.failure.is_none() {
                    db.failure = Some(err.to_string());
                }
                0
            }
        }
    }

    /// Runs a read against the connection. SQL failures degrade to `None`.
    fn query<T>(&self, read: impl FnOnce(&Connection) -> rusqlite::Result<Option<T>>) -> Option<T> {
        let db = lock(&self.db);
        match read(&db.conn) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "storage read failed");
                None
            }
        }
    }

    fn release_archive(&self, url: &str) {
        lock(&self.archives).remove(url);
    }

    /// `COMMIT; BEGIN`, or surfacing of a recorded setter failure. Resets
    /// each archive's dirty flag once the transaction state is settled.
    fn commit_all(&self) -> Result<(), StorageError> {
        let (outcome, settled) = {
            let mut db = lock(&self.db);
            if let Some(failure) = db.failure.take() {
                // The unit is damaged: throw it away and report the first
                // error instead of committing a partial write.
                if let Err(err) = db.conn.execute_batch("ROLLBACK; BEGIN") {
                    tracing::warn!(error = %err, "transaction restart failed");
                }
                db.dirty = false;
                (Err(StorageError::WriteFailed(failure)), true)
            } else if db.dirty {
                match db.conn.execute_batch("COMMIT; BEGIN") {
                    Ok(()) => {
                        db.dirty = false;
                        (Ok(()), true)
                    }
                    Err(err) => (Err(StorageError::WriteFailed(err.to_string())), false),
                }
            } else {
                (Ok(()), true)
            }
        };
        if settled {
            for archive in lock(&self.archives).values() {
                archive.reset_dirty();
            }
        }
        outcome
    }

    fn rollback_all(&self) -> Result<(), StorageError> {
        {
            let mut db = lock(&self.db);
            let restart = db.dirty || db.failure.is_some();
            db.failure = None;
            if restart {
                db.conn
                    .execute_batch("ROLLBACK; BEGIN")
                    .map_err(|err| StorageError::WriteFailed(err.to_string()))?;
                db.dirty = false;
            }
        }
        for archive in lock(&self.archives).values() {
            archive.reset_dirty();
        }
        Ok(())
    }
}

/// Dropping the last handle without `close()` still settles the
/// long-lived transaction: flush under auto-commit, discard otherwise.
impl Drop for SqliteStorageInner {
    fn drop(&mut self) {
        {
            if lock(&self.db).closed {
                return;
            }
        }
        self.scheduler.stop();
        if self.params.auto_commit {
            if let Err(err) = self.commit_all() {
                tracing::warn!(error = %err, "commit on drop failed");
            }
        }
        let mut db = lock(&self.db);
        let _ = db.conn.execute_batch(if self.params.auto_commit {
            "COMMIT"
        } else {
            "ROLLBACK"
        });
        db.closed = true;
    }
}

impl Storage for SqliteStorage {
    fn archive_for(&self, url: &str) -> Result<Arc<dyn FeedStorage>, StorageError> {
        self.inner.ensure_open()?;
        {
            let archives = lock(&self.inner.archives);
            if let Some(archive) = archives.get(url) {
                let archive = Arc::clone(archive);
                return Ok(archive);
            }
        }

        let (feed_id, registered) = {
            let mut db = lock(&self.inner.db);
            let inserted = db
                .conn
                .execute("INSERT OR IGNORE INTO feed (url) VALUES (?1)", params![url])
                .map_err(|err| StorageError::WriteFailed(err.to_string()))?;
            if inserted > 0 {
                db.dirty = true;
            }
            let feed_id = db
                .conn
                .query_row("SELECT id FROM feed WHERE url = ?1", params![url], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(|err| StorageError::CorruptIndex(err.to_string()))?;
            (feed_id, inserted > 0)
        };
        if registered {
            self.inner.touch();
        }

        let fresh = Arc::new(SqliteFeedStorage {
            url: url.to_string(),
            feed_id,
            owner: Arc::downgrade(&self.inner),
            dirty: AtomicBool::new(false),
        });
        let mut archives = lock(&self.inner.archives);
        let archive = Arc::clone(archives.entry(url.to_string()).or_insert(fresh));
        Ok(archive)
    }

    fn feeds(&self) -> Vec<String> {
        self.inner
            .query(|conn| {
                let mut stmt = conn.prepare("SELECT url FROM feed ORDER BY url")?;
                let urls = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(Some(urls))
            })
            .unwrap_or_default()
    }

    fn unread_for(&self, url: &str) -> Option<i64> {
        self.inner.query(|conn| {
            conn.query_row("SELECT unread FROM feed WHERE url = ?1", params![url], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    fn set_unread_for(&self, url: &str, unread: i64) {
        if self
            .inner
            .run("UPDATE feed SET unread = ?2 WHERE url = ?1", params![url, unread])
            > 0
        {
            self.inner.touch();
        }
    }

    fn total_count_for(&self, url: &str) -> Option<i64> {
        self.inner.query(|conn| {
            conn.query_row(
                "SELECT total_count FROM feed WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set_total_count_for(&self, url: &str, total: i64) {
        if self
            .inner
            .run(
                "UPDATE feed SET total_count = ?2 WHERE url = ?1",
                params![url, total],
            )
            > 0
        {
            self.inner.touch();
        }
    }

    fn last_fetch_for(&self, url: &str) -> Option<DateTime<Utc>> {
        self.inner
            .query(|conn| {
                conn.query_row(
                    "SELECT last_fetch FROM feed WHERE url = ?1",
                    params![url],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()
            })
            .flatten()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    fn set_last_fetch_for(&self, url: &str, when: Option<DateTime<Utc>>) {
        if self
            .inner
            .run(
                "UPDATE feed SET last_fetch = ?2 WHERE url = ?1",
                params![url, when.map(|dt| dt.timestamp())],
            )
            > 0
        {
            self.inner.touch();
        }
    }

    fn store_feed_list(&self, opml: &str) {
        self.inner.run(
            "INSERT INTO blob_store (id, feed_list) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET feed_list = excluded.feed_list",
            params![opml],
        );
        self.inner.touch();
    }

    fn restore_feed_list(&self) -> Option<String> {
        self.inner.query(|conn| {
            conn.query_row("SELECT feed_list FROM blob_store WHERE id = 1", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map(|row| row.flatten())
        })
    }

    fn store_tag_set(&self, xml: &str) {
        self.inner.run(
            "INSERT INTO blob_store (id, tag_set) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET tag_set = excluded.tag_set",
            params![xml],
        );
        self.inner.touch();
    }

    fn restore_tag_set(&self) -> Option<String> {
        self.inner.query(|conn| {
            conn.query_row("SELECT tag_set FROM blob_store WHERE id = 1", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map(|row| row.flatten())
        })
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
        self.inner.rollback_all()
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.ensure_open()?;
        lock(&self.inner.archives).clear();
        {
            let mut db = lock(&self.inner.db);
            db.conn
                .execute_batch(
                    "DELETE FROM article_category;
                     DELETE FROM article;
                     DELETE FROM feed;
                     DELETE FROM blob_store",
                )
                .map_err(|err| StorageError::WriteFailed(err.to_string()))?;
            db.dirty = true;
        }
        self.inner.commit_all()
    }

    fn close(&self) -> Result<(), StorageError> {
        {
            if lock(&self.inner.db).closed {
                return Ok(());
            }
        }
        self.inner.scheduler.stop();
        if self.inner.params.auto_commit {
            self.inner.commit_all()?;
        }
        let mut db = lock(&self.inner.db);
        // End the long-lived transaction; without auto-commit whatever it
        // held is discarded.
        let _ = db.conn.execute_batch(if self.inner.params.auto_commit {
            "COMMIT"
        } else {
            "ROLLBACK"
        });
        db.closed = true;
        drop(db);
        lock(&self.inner.archives).clear();
        Ok(())
    }
}

// ============================================================================
// Archive
// ============================================================================

/// The SQLite [`FeedStorage`]: rows keyed by `(feed_id, guid)` on the
/// shared connection. `commit()` and `rollback()` act on the shared
/// transaction, i.e. on every archive of this storage at once.
#[derive(Debug)]
pub struct SqliteFeedStorage {
    url: String,
    feed_id: i64,
    owner: Weak<SqliteStorageInner>,
    dirty: AtomicBool,
}

impl SqliteFeedStorage {
    fn reset_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Runs a single-value read for one article column. `None` when the
    /// article does not exist.
    fn field<T: rusqlite::types::FromSql>(&self, guid: &str, sql: &str) -> Option<T> {
        let owner = self.owner.upgrade()?;
        owner.query(|conn| {
            conn.query_row(sql, params![self.feed_id, guid], |row| row.get(0))
                .optional()
        })
    }

    /// Runs a write and marks this archive dirty when it touched a row.
    fn set(&self, sql: &str, params: impl rusqlite::Params) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        if owner.run(sql, params) > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            owner.touch();
        }
    }
}

impl FeedStorage for SqliteFeedStorage {
    fn add_entry(&self, guid: &str) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let inserted = owner.run(
            "INSERT OR IGNORE INTO article (feed_id, guid) VALUES (?1, ?2)",
            params![self.feed_id, guid],
        );
        if inserted > 0 {
            owner.run(
                "UPDATE feed SET total_count = total_count + 1 WHERE id = ?1",
                params![self.feed_id],
            );
        }
        self.dirty.store(true, Ordering::SeqCst);
        owner.touch();
    }

    fn contains(&self, guid: &str) -> bool {
        self.field::<i64>(guid, "SELECT 1 FROM article WHERE feed_id = ?1 AND guid = ?2")
            .is_some()
    }

    fn delete_article(&self, guid: &str) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let removed = owner.run(
            "DELETE FROM article WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid],
        );
        if removed > 0 {
            owner.run(
                "UPDATE feed SET total_count = total_count - 1 WHERE id = ?1",
                params![self.feed_id],
            );
            self.dirty.store(true, Ordering::SeqCst);
            owner.touch();
        }
    }

    fn set_deleted(&self, guid: &str) {
        self.set(
            "UPDATE article SET title = '', description = '', content = '', link = '',
             author_name = '', author_uri = '', author_email = '', comments_link = ''
             WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid],
        );
    }

    fn clear(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        owner.run(
            "DELETE FROM article WHERE feed_id = ?1",
            params![self.feed_id],
        );
        owner.run(
            "UPDATE feed SET unread = 0, total_count = 0 WHERE id = ?1",
            params![self.feed_id],
        );
        self.dirty.store(true, Ordering::SeqCst);
        owner.touch();
    }

    fn articles(&self) -> Vec<String> {
        let Some(owner) = self.owner.upgrade() else {
            return Vec::new();
        };
        owner
            .query(|conn| {
                let mut stmt =
                    conn.prepare("SELECT guid FROM article WHERE feed_id = ?1 ORDER BY rowid")?;
                let guids = stmt
                    .query_map(params![self.feed_id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(Some(guids))
            })
            .unwrap_or_default()
    }

    fn unread(&self) -> i64 {
        let Some(owner) = self.owner.upgrade() else {
            return 0;
        };
        owner
            .query(|conn| {
                conn.query_row(
                    "SELECT unread FROM feed WHERE id = ?1",
                    params![self.feed_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .unwrap_or(0)
    }

    fn set_unread(&self, unread: i64) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        if owner.run(
            "UPDATE feed SET unread = ?2 WHERE id = ?1",
            params![self.feed_id, unread],
        ) > 0
        {
            owner.touch();
        }
    }

    fn total_count(&self) -> i64 {
        let Some(owner) = self.owner.upgrade() else {
            return 0;
        };
        owner
            .query(|conn| {
                conn.query_row(
                    "SELECT total_count FROM feed WHERE id = ?1",
                    params![self.feed_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .unwrap_or(0)
    }

    fn last_fetch(&self) -> Option<DateTime<Utc>> {
        let owner = self.owner.upgrade()?;
        owner
            .query(|conn| {
                conn.query_row(
                    "SELECT last_fetch FROM feed WHERE id = ?1",
                    params![self.feed_id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()
            })
            .flatten()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    fn set_last_fetch(&self, when: Option<DateTime<Utc>>) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        if owner.run(
            "UPDATE feed SET last_fetch = ?2 WHERE id = ?1",
            params![self.feed_id, when.map(|dt| dt.timestamp())],
        ) > 0
        {
            owner.touch();
        }
    }

    fn title(&self, guid: &str) -> Option<String> {
        self.field(guid, "SELECT title FROM article WHERE feed_id = ?1 AND guid = ?2")
    }

    fn set_title(&self, guid: &str, title: &str) {
        self.set(
            "UPDATE article SET title = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, title],
        );
    }

    fn description(&self, guid: &str) -> Option<String> {
        self.field(
            guid,
            "SELECT description FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
    }

    fn set_description(&self, guid: &str, description: &str) {
        self.set(
            "UPDATE article SET description = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, description],
        );
    }

    fn content(&self, guid: &str) -> Option<String> {
        let owner = self.owner.upgrade()?;
        owner.query(|conn| {
            conn.query_row(
                "SELECT content, description FROM article WHERE feed_id = ?1 AND guid = ?2",
                params![self.feed_id, guid],
                |row| {
                    let content: String = row.get(0)?;
                    let description: String = row.get(1)?;
                    Ok(if content.is_empty() { description } else { content })
                },
            )
            .optional()
        })
    }

    fn set_content(&self, guid: &str, content: &str) {
        self.set(
            "UPDATE article SET content = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, content],
        );
    }

    fn link(&self, guid: &str) -> Option<String> {
        self.field(guid, "SELECT link FROM article WHERE feed_id = ?1 AND guid = ?2")
    }

    fn set_link(&self, guid: &str, link: &str) {
        self.set(
            "UPDATE article SET link = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, link],
        );
    }

    fn author(&self, guid: &str) -> Option<Person> {
        let owner = self.owner.upgrade()?;
        owner.query(|conn| {
            conn.query_row(
                "SELECT author_name, author_uri, author_email FROM article
                 WHERE feed_id = ?1 AND guid = ?2",
                params![self.feed_id, guid],
                |row| {
                    Ok(Person {
                        name: row.get(0)?,
                        uri: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    fn set_author(&self, guid: &str, author: &Person) {
        self.set(
            "UPDATE article SET author_name = ?3, author_uri = ?4, author_email = ?5
             WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, author.name, author.uri, author.email],
        );
    }

    fn comments(&self, guid: &str) -> Option<i64> {
        self.field(
            guid,
            "SELECT comments FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
    }

    fn set_comments(&self, guid: &str, count: i64) {
        self.set(
            "UPDATE article SET comments = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, count],
        );
    }

    fn comments_link(&self, guid: &str) -> Option<String> {
        self.field(
            guid,
            "SELECT comments_link FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
    }

    fn set_comments_link(&self, guid: &str, link: &str) {
        self.set(
            "UPDATE article SET comments_link = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, link],
        );
    }

    fn status(&self, guid: &str) -> Option<Status> {
        self.field::<u32>(
            guid,
            "SELECT status FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
        .map(Status::from_bits)
    }

    fn set_status(&self, guid: &str, status: Status) {
        self.set(
            "UPDATE article SET status = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, status.bits()],
        );
    }

    fn pub_date(&self, guid: &str) -> Option<DateTime<Utc>> {
        self.field::<Option<i64>>(
            guid,
            "SELECT pub_date FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
        .flatten()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    fn set_pub_date(&self, guid: &str, date: Option<DateTime<Utc>>) {
        self.set(
            "UPDATE article SET pub_date = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, date.map(|dt| dt.timestamp())],
        );
    }

    fn hash(&self, guid: &str) -> Option<u32> {
        self.field(guid, "SELECT hash FROM article WHERE feed_id = ?1 AND guid = ?2")
    }

    fn set_hash(&self, guid: &str, hash: u32) {
        self.set(
            "UPDATE article SET hash = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, hash],
        );
    }

    fn guid_is_hash(&self, guid: &str) -> Option<bool> {
        self.field(
            guid,
            "SELECT guid_is_hash FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
    }

    fn set_guid_is_hash(&self, guid: &str, is_hash: bool) {
        self.set(
            "UPDATE article SET guid_is_hash = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, is_hash],
        );
    }

    fn guid_is_permalink(&self, guid: &str) -> Option<bool> {
        self.field(
            guid,
            "SELECT guid_is_permalink FROM article WHERE feed_id = ?1 AND guid = ?2",
        )
    }

    fn set_guid_is_permalink(&self, guid: &str, is_permalink: bool) {
        self.set(
            "UPDATE article SET guid_is_permalink = ?3 WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid, is_permalink],
        );
    }

    fn enclosure(&self, guid: &str) -> Option<Option<Enclosure>> {
        let owner = self.owner.upgrade()?;
        owner.query(|conn| {
            conn.query_row(
                "SELECT has_enclosure, enclosure_url, enclosure_title, enclosure_type,
                        enclosure_length, enclosure_duration
                 FROM article WHERE feed_id = ?1 AND guid = ?2",
                params![self.feed_id, guid],
                |row| {
                    let has: bool = row.get(0)?;
                    if !has {
                        return Ok(None);
                    }
                    Ok(Some(Enclosure {
                        url: row.get(1)?,
                        title: row.get(2)?,
                        mime_type: row.get(3)?,
                        length: row.get(4)?,
                        duration: row.get(5)?,
                    }))
                },
            )
            .optional()
        })
    }

    fn set_enclosure(&self, guid: &str, enclosure: &Enclosure) {
        self.set(
            "UPDATE article SET has_enclosure = 1, enclosure_url = ?3, enclosure_title = ?4,
             enclosure_type = ?5, enclosure_length = ?6, enclosure_duration = ?7
             WHERE feed_id = ?1 AND guid = ?2",
            params![
                self.feed_id,
                guid,
                enclosure.url,
                enclosure.title,
                enclosure.mime_type,
                enclosure.length,
                enclosure.duration
            ],
        );
    }

    fn remove_enclosure(&self, guid: &str) {
        self.set(
            "UPDATE article SET has_enclosure = 0, enclosure_url = '', enclosure_title = '',
             enclosure_type = '', enclosure_length = 0, enclosure_duration = 0
             WHERE feed_id = ?1 AND guid = ?2",
            params![self.feed_id, guid],
        );
    }

    fn categories(&self, guid: &str) -> Option<Vec<Category>> {
        let owner = self.owner.upgrade()?;
        owner.query(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM article WHERE feed_id = ?1 AND guid = ?2",
                    params![self.feed_id, guid],
                    |_row| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }
            let mut stmt = conn.prepare(
                "SELECT term, scheme, label FROM article_category
                 WHERE feed_id = ?1 AND guid = ?2 ORDER BY rowid",
            )?;
            let categories = stmt
                .query_map(params![self.feed_id, guid], |row| {
                    Ok(Category {
                        term: row.get(0)?,
                        scheme: row.get(1)?,
                        label: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<Category>>>()?;
            Ok(Some(categories))
        })
    }

    fn add_category(&self, guid: &str, category: &Category) {
        // The guarded insert keeps this a no-op for unknown GUIDs instead
        // of tripping the foreign key and poisoning the transaction.
        self.set(
            "INSERT OR IGNORE INTO article_category (feed_id, guid, term, scheme, label)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE EXISTS (SELECT 1 FROM article WHERE feed_id = ?1 AND guid = ?2)",
            params![
                self.feed_id,
                guid,
                category.term,
                category.scheme,
                category.label
            ],
        );
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn commit(&self) -> Result<(), StorageError> {
        match self.owner.upgrade() {
            Some(owner) => owner.commit_all(),
            None => Err(StorageError::Closed),
        }
    }

    fn rollback(&self) -> Result<(), StorageError> {
        match self.owner.upgrade() {
            Some(owner) => owner.rollback_all(),
            None => Err(StorageError::Closed),
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        let Some(owner) = self.owner.upgrade() else {
            return Ok(());
        };
        if owner.params.auto_commit {
            owner.commit_all()?;
        }
        owner.release_archive(&self.url);
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds [`SqliteStorage`] instances under the key `sqlite`.
pub struct SqliteStorageFactory;

impl StorageFactory for SqliteStorageFactory {
    fn key(&self) -> &'static str {
        "sqlite"
    }

    fn name(&self) -> &'static str {
        "single-file SQLite archive"
    }

    fn create_storage(&self, params: &StorageParams) -> Result<Arc<dyn Storage>, StorageError> {
        let storage = SqliteStorage::open(params.clone())?;
        Ok(Arc::new(storage))
    }
}
