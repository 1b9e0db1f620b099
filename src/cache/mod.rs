//! Query cache for issue-tracker reads.
//!
//! This module provides the in-memory cache shared by reads and
//! optimistic mutations:
//! - Entries keyed by normalized query identity (listings, single
//!   issues, the dashboard)
//! - Value-equality change notification with per-entry versions
//! - Tag-based invalidation scans for mutations

mod entry;
mod keys;
mod store;
mod tags;

pub use entry::{CacheEntry, CachedValue, FetchStatus};
pub use keys::{ListKey, QueryKey, ResourceKind, Tag, DEFAULT_PAGE, DEFAULT_PAGE_LIMIT};
pub use store::{CacheEvent, CacheStore, Subscription};
pub use tags::{Affected, TagIndex};
