//! Item model and its lossless serialization format.
//!
//! This module provides:
//! - [`Item`] and its sub-types ([`Person`], [`Enclosure`], [`Category`]):
//!   the in-memory representation of a single archived article
//! - [`Status`]: bit-flag read/important state
//! - [`serialize`] / [`deserialize`]: the Atom-with-extensions wire format
//!   every archival backend persists, plus [`write_feed`] /
//!   [`read_feed_entries`] for whole-archive `<feed>` documents
//!
//! `Item` is a value type with no hidden I/O; the serializer is the only
//! place where load order, omission rules and namespace handling live.

mod model;
mod serializer;
mod status;

pub use model::{Category, Enclosure, Item, Person};
pub use serializer::{deserialize, read_feed_entries, serialize, write_feed, SerializerError};
pub use status::Status;
