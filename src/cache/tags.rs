//! Invalidation: locating the cache entries a mutation affects.

use super::keys::{QueryKey, ResourceKind, Tag};
use super::store::CacheStore;

/// Cache keys touched by one mutation, split by treatment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Affected {
  /// Entries the coordinator edits in place.
  pub patch: Vec<QueryKey>,
  /// Entries that cannot be patched in place. They are marked stale on
  /// commit so their next read refetches; a rollback leaves them alone.
  pub refetch: Vec<QueryKey>,
}

/// Classifies the entries affected by issue mutations.
///
/// Owns no table of its own: affected keys are found by scanning the
/// store and testing tag membership. Selection is conservative for
/// creates: every cached listing is a candidate, whether or not its
/// filter would admit the new issue, and the next authoritative refetch
/// corrects any over-inclusion.
#[derive(Clone)]
pub struct TagIndex {
  store: CacheStore,
}

impl TagIndex {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  /// Entries affected by creating an issue: every cached listing, plus
  /// the refetch family.
  pub fn affected_by_create(&self) -> Affected {
    let mut affected = Affected::default();
    for key in self.store.entries_tagged(&Tag::kind(ResourceKind::Issue)) {
      match key {
        QueryKey::IssueList(_) => affected.patch.push(key),
        QueryKey::Dashboard => affected.refetch.push(key),
        QueryKey::IssueDetail(_) => {}
      }
    }
    affected
  }

  /// Entries affected by updating the issue `id`: every listing that
  /// contains it, its detail entry, plus the refetch family.
  pub fn affected_by_update(&self, id: &str) -> Affected {
    self.affected_by_entity(id)
  }

  /// Entries affected by deleting the issue `id`. Same selection as an
  /// update; the coordinator treats the two sets differently.
  pub fn affected_by_delete(&self, id: &str) -> Affected {
    self.affected_by_entity(id)
  }

  fn affected_by_entity(&self, id: &str) -> Affected {
    let mut affected = Affected::default();
    for key in self
      .store
      .entries_tagged(&Tag::entity(ResourceKind::Issue, id))
    {
      match key {
        QueryKey::IssueList(_) | QueryKey::IssueDetail(_) => affected.patch.push(key),
        QueryKey::Dashboard => {}
      }
    }
    for key in self.store.entries_tagged(&Tag::kind(ResourceKind::Issue)) {
      if matches!(key, QueryKey::Dashboard) {
        affected.refetch.push(key);
      }
    }
    affected
  }
}
