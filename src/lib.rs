//! feedvault: an embedded article-archive engine for feed readers.
//!
//! The crate stores one archive per feed, keyed by the feed's URL. Each
//! archive holds articles keyed by GUID, with per-field accessors, counter
//! tracking (unread/total/last fetch), and deferred commits debounced over a
//! configurable window. Three interchangeable backends implement the same
//! [`storage::Storage`] / [`storage::FeedStorage`] traits:
//!
//! - `vault`: one Atom file per feed plus a TOML counter index
//! - `sqlite`: a single SQLite database under the archive directory
//! - `memory`: transient, for tests and previews
//!
//! Backends are registered in a [`storage::StorageRegistry`] and selected by
//! key, so archives can be migrated between them with
//! [`storage::Storage::add`].

pub mod config;
pub mod item;
pub mod storage;
pub mod util;

pub use config::Config;
pub use item::{Category, Enclosure, Item, Person, Status};
pub use storage::{FeedStorage, Storage, StorageError, StorageParams, StorageRegistry};
