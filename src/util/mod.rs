//! Utility functions shared across the archive engine.
//!
//! This module provides reusable utilities for:
//!
//! - **Content hashing**: the deterministic 32-bit hash used for derived
//!   item identities and over-long archive file names
//! - **Atomic file writes**: write-to-temp-then-rename persistence so a
//!   crashed commit never clobbers the previous generation
//!
//! # Examples
//!
//! ```
//! use feedvault::util::{content_hash, derived_id};
//!
//! let h = content_hash("some title");
//! assert_eq!(h, content_hash("some title")); // stable across runs
//!
//! let id = derived_id("A title", "A description", "");
//! assert!(id.starts_with("hash:"));
//! ```

mod fs;
mod hash;

pub use fs::atomic_write;
pub use hash::{content_hash, derived_id};
