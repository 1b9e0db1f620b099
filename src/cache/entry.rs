//! Cache entry bookkeeping: fetch status, stored values, versions.

use std::collections::BTreeSet;

use crate::error::RemoteError;
use crate::types::{DashboardSnapshot, Issue, IssuePage};

use super::keys::Tag;

/// Fetch lifecycle of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
  /// No fetch has been attempted yet.
  Uninitialized,
  /// A fetch is in flight. Any previous value stays visible meanwhile.
  Loading,
  /// The last fetch succeeded.
  Ready,
  /// The last fetch failed.
  Error(RemoteError),
}

impl FetchStatus {
  pub fn is_ready(&self) -> bool {
    matches!(self, Self::Ready)
  }

  pub fn is_loading(&self) -> bool {
    matches!(self, Self::Loading)
  }
}

/// Value held by a cache entry, one shape per query-key kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
  Page(IssuePage),
  Issue(Issue),
  Dashboard(DashboardSnapshot),
}

impl CachedValue {
  pub fn as_page(&self) -> Option<&IssuePage> {
    match self {
      Self::Page(page) => Some(page),
      _ => None,
    }
  }

  pub fn as_issue(&self) -> Option<&Issue> {
    match self {
      Self::Issue(issue) => Some(issue),
      _ => None,
    }
  }

  pub fn as_dashboard(&self) -> Option<&DashboardSnapshot> {
    match self {
      Self::Dashboard(snapshot) => Some(snapshot),
      _ => None,
    }
  }
}

/// One cached query result.
///
/// The version counter is scoped to the entry's lifetime in the store: it
/// is bumped on every successful write to the key and restarts when the
/// entry is removed and later re-created.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub value: Option<CachedValue>,
  pub status: FetchStatus,
  /// Set by invalidation. A stale entry keeps serving its value but is
  /// refetched on the next read.
  pub stale: bool,
  /// Tags attached by the write that produced the value.
  pub tags: BTreeSet<Tag>,
  pub version: u64,
}

impl CacheEntry {
  /// Entry state before any fetch has touched the key.
  pub fn empty() -> Self {
    Self {
      value: None,
      status: FetchStatus::Uninitialized,
      stale: false,
      tags: BTreeSet::new(),
      version: 0,
    }
  }

  /// Ready and not stale: servable without hitting the remote.
  pub fn is_fresh(&self) -> bool {
    self.status.is_ready() && !self.stale
  }

  /// Compare the subscriber-visible fields, ignoring the version.
  /// Writes that change nothing observable still bump the version but
  /// do not notify.
  pub fn same_observable(&self, other: &CacheEntry) -> bool {
    self.value == other.value
      && self.status == other.status
      && self.stale == other.stale
      && self.tags == other.tags
  }
}

impl Default for CacheEntry {
  fn default() -> Self {
    Self::empty()
  }
}
