//! Client facade: cached reads, optimistic mutations, subscriptions.

use std::collections::BTreeSet;
use std::sync::Arc;

use color_eyre::Result;
use tracing::debug;

use crate::cache::{
  CacheEntry, CacheStore, CachedValue, FetchStatus, QueryKey, ResourceKind, Subscription, Tag,
};
use crate::config::Config;
use crate::error::RemoteError;
use crate::mutation::{IssuePatch, MutationCoordinator, MutationHandle, MutationOutcome, MutationRecord};
use crate::remote::{HttpRemote, Remote};
use crate::types::{DashboardSnapshot, Issue, IssueDraft, IssueFilter, IssuePage, User};

/// Issue-tracker client with a read-through cache and optimistic writes.
///
/// Owns the cache store and the mutation coordinator explicitly; there
/// is no ambient state. Clones share both, so one client can serve many
/// views.
///
/// Reads are cache-first: a fresh entry is served without I/O, anything
/// else refetches. A fetch failure falls back to the last cached value
/// when one exists, so going offline degrades to stale data instead of
/// errors.
#[derive(Clone)]
pub struct TrackerClient {
  store: CacheStore,
  coordinator: MutationCoordinator,
  remote: Arc<dyn Remote>,
}

impl TrackerClient {
  /// Build a client over any remote, attributing optimistic creates to
  /// `actor`.
  pub fn new(remote: Arc<dyn Remote>, actor: User) -> Self {
    let store = CacheStore::new();
    let coordinator = MutationCoordinator::new(store.clone(), remote.clone(), actor);
    Self {
      store,
      coordinator,
      remote,
    }
  }

  /// Build a client against the configured tracker API, reading the
  /// token from the environment.
  pub fn from_config(config: &Config) -> Result<Self> {
    let remote = Arc::new(HttpRemote::from_config(config)?);
    Ok(Self::new(remote, config.actor.to_user()))
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Change events for one query key. Views re-read after each event.
  pub fn subscribe(&self, key: &QueryKey) -> Subscription {
    self.store.subscribe(key)
  }

  /// Mutations that have not reached a terminal state yet.
  pub fn in_flight(&self) -> Vec<MutationRecord> {
    self.coordinator.in_flight()
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Fetch one page of a filtered issue listing, cache-first.
  pub async fn issues(&self, filter: &IssueFilter) -> Result<IssuePage, RemoteError> {
    let key = QueryKey::issue_list(filter);
    if let Some(page) = self.fresh_value(&key).and_then(|value| value.as_page().cloned()) {
      return Ok(page);
    }

    self.mark_loading(&key);
    match self.remote.list_issues(filter).await {
      Ok(page) => {
        self.store_success(&key, CachedValue::Page(page.clone()), page_tags(&page));
        Ok(page)
      }
      Err(error) => match self.store_failure(&key, error.clone()) {
        Some(CachedValue::Page(page)) => Ok(page),
        _ => Err(error),
      },
    }
  }

  /// Fetch a single issue by id, cache-first.
  pub async fn issue(&self, id: &str) -> Result<Issue, RemoteError> {
    let key = QueryKey::issue_detail(id);
    if let Some(issue) = self.fresh_value(&key).and_then(|value| value.as_issue().cloned()) {
      return Ok(issue);
    }

    self.mark_loading(&key);
    match self.remote.get_issue(id).await {
      Ok(issue) => {
        let tags = [Tag::entity(ResourceKind::Issue, id)].into_iter().collect();
        self.store_success(&key, CachedValue::Issue(issue.clone()), tags);
        Ok(issue)
      }
      Err(error) => match self.store_failure(&key, error.clone()) {
        Some(CachedValue::Issue(issue)) => Ok(issue),
        _ => Err(error),
      },
    }
  }

  /// Fetch the dashboard summary, cache-first. The dashboard entry is
  /// tagged as issue-derived, so committed issue mutations mark it stale
  /// and the next call here refetches.
  pub async fn dashboard(&self) -> Result<DashboardSnapshot, RemoteError> {
    let key = QueryKey::Dashboard;
    if let Some(snapshot) = self
      .fresh_value(&key)
      .and_then(|value| value.as_dashboard().cloned())
    {
      return Ok(snapshot);
    }

    self.mark_loading(&key);
    match self.remote.get_dashboard().await {
      Ok(snapshot) => {
        let tags = [Tag::kind(ResourceKind::Issue)].into_iter().collect();
        self.store_success(&key, CachedValue::Dashboard(snapshot.clone()), tags);
        Ok(snapshot)
      }
      Err(error) => match self.store_failure(&key, error.clone()) {
        Some(CachedValue::Dashboard(snapshot)) => Ok(snapshot),
        _ => Err(error),
      },
    }
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Create an issue optimistically. See [`MutationCoordinator::dispatch_create`].
  pub fn create_issue(&self, draft: IssueDraft) -> MutationHandle {
    self.coordinator.dispatch_create(draft)
  }

  /// Update an issue optimistically. See [`MutationCoordinator::dispatch_update`].
  pub fn update_issue(&self, id: impl Into<String>, patch: IssuePatch) -> MutationHandle {
    self.coordinator.dispatch_update(id, patch)
  }

  /// Delete an issue optimistically. See [`MutationCoordinator::dispatch_delete`].
  pub fn delete_issue(&self, id: impl Into<String>) -> MutationHandle {
    self.coordinator.dispatch_delete(id)
  }

  /// Delete several issues as independent mutations with per-item
  /// outcomes.
  pub async fn bulk_delete(&self, ids: Vec<String>) -> Vec<(String, MutationOutcome)> {
    self.coordinator.bulk_delete(ids).await
  }

  // ==========================================================================
  // Read-path plumbing
  // ==========================================================================

  fn fresh_value(&self, key: &QueryKey) -> Option<CachedValue> {
    let entry = self.store.read(key)?;
    if entry.is_fresh() {
      debug!(key = %key.description(), "Serving fresh cache entry");
      entry.value
    } else {
      None
    }
  }

  /// Flip the entry to loading while keeping any previous value visible.
  fn mark_loading(&self, key: &QueryKey) {
    let _ = self.store.write(key, |entry| {
      let mut next = entry.clone();
      next.status = FetchStatus::Loading;
      Ok(next)
    });
  }

  fn store_success(&self, key: &QueryKey, value: CachedValue, tags: BTreeSet<Tag>) {
    let _ = self.store.write(key, |_| {
      Ok(CacheEntry {
        value: Some(value.clone()),
        status: FetchStatus::Ready,
        stale: false,
        tags: tags.clone(),
        version: 0,
      })
    });
  }

  /// Record the failure and hand back the previous value, if any, so
  /// the caller can serve it stale.
  fn store_failure(&self, key: &QueryKey, error: RemoteError) -> Option<CachedValue> {
    let written = self.store.write(key, |entry| {
      let mut next = entry.clone();
      next.status = FetchStatus::Error(error.clone());
      Ok(next)
    });
    written.ok().and_then(|entry| entry.value)
  }
}

fn page_tags(page: &IssuePage) -> BTreeSet<Tag> {
  let mut tags: BTreeSet<Tag> = page
    .issues
    .iter()
    .map(|issue| Tag::entity(ResourceKind::Issue, issue.id.clone()))
    .collect();
  tags.insert(Tag::kind(ResourceKind::Issue));
  tags
}
