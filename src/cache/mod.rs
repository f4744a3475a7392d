//! Local content cache for downloaded and converted images
//!
//! Entries are plain files under one cache root, keyed by filename.
//!
//! # Entry States
//!
//! | State | On disk | Description |
//! |-------|---------|-------------|
//! | Absent | nothing | Never fetched |
//! | InProgress | `.utahtmp-<name>-<id>` | Download running or interrupted |
//! | Present | `<name>` | Committed, trusted without validation |
//!
//! Concurrent fetches of the same name are not coordinated; the last rename
//! wins.

pub mod fetch;
pub mod store;

pub use fetch::{Fetcher, HttpFetcher};
pub use store::{CacheStore, CachedFile, EntryState, TEMP_PREFIX};
