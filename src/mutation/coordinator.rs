//! Mutation lifecycle: optimistic apply, dispatch, commit or roll back.
//!
//! Each dispatched mutation applies its optimistic edit to the cache
//! synchronously, before any network traffic, then resolves on a spawned
//! task. Exactly one of commit-merge or rollback happens per mutation;
//! removing the in-flight record is the gate that makes a second
//! terminal transition impossible.

use chrono::Utc;
use futures::future;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::{Affected, CacheStore, CachedValue, QueryKey, ResourceKind, Tag, TagIndex};
use crate::error::RemoteError;
use crate::remote::Remote;
use crate::types::{Issue, IssueDraft, IssuePriority, IssueSeverity, IssueStatus, User};

use super::patch::{
  prepend_issue, remove_issue, replace_issue, temp_id, InversePatch, IssuePatch, ListSnapshot,
};

// ============================================================================
// Mutation records
// ============================================================================

/// Identity of one mutation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Create,
  Update,
  Delete,
}

/// Lifecycle of one mutation instance. Terminal states are `Committed`
/// and `RolledBack`; nothing transitions out of either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
  Initiated,
  OptimisticallyApplied,
  Committed,
  RolledBack,
}

/// Observable record of one mutation while it is in flight.
#[derive(Debug, Clone)]
pub struct MutationRecord {
  pub id: MutationId,
  pub kind: MutationKind,
  pub state: MutationState,
  /// Inverse of the optimistic application, present once applied and
  /// held until resolution.
  pub inverse: Option<InversePatch>,
}

/// Terminal result of one mutation, as delivered to the dispatching view.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
  /// The server confirmed the mutation. Creates and updates carry the
  /// authoritative entity; deletes carry nothing.
  Committed { entity: Option<Issue> },
  /// The optimistic edit was undone.
  RolledBack { error: RemoteError },
}

impl MutationOutcome {
  pub fn is_committed(&self) -> bool {
    matches!(self, Self::Committed { .. })
  }
}

/// Handle on an in-flight mutation.
///
/// The mutation runs to completion whether or not the handle is kept;
/// dropping it only gives up the ability to observe the outcome.
pub struct MutationHandle {
  id: MutationId,
  receiver: oneshot::Receiver<MutationOutcome>,
}

impl MutationHandle {
  pub fn id(&self) -> MutationId {
    self.id
  }

  /// Wait for the terminal outcome.
  pub async fn outcome(self) -> MutationOutcome {
    match self.receiver.await {
      Ok(outcome) => outcome,
      // Sender dropped without sending - the runtime tore the resolution
      // task down before it finished.
      Err(_) => MutationOutcome::RolledBack {
        error: RemoteError::Transport("mutation resolution was interrupted".to_string()),
      },
    }
  }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Orchestrates optimistic mutations against the cache and the remote.
///
/// Cheap to clone; clones share the cache and the in-flight registry.
#[derive(Clone)]
pub struct MutationCoordinator {
  store: CacheStore,
  index: TagIndex,
  remote: Arc<dyn Remote>,
  /// The user new issues are attributed to until the server answers.
  actor: User,
  in_flight: Arc<Mutex<HashMap<MutationId, MutationRecord>>>,
  next_id: Arc<AtomicU64>,
}

impl MutationCoordinator {
  pub fn new(store: CacheStore, remote: Arc<dyn Remote>, actor: User) -> Self {
    let index = TagIndex::new(store.clone());
    Self {
      store,
      index,
      remote,
      actor,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      next_id: Arc::new(AtomicU64::new(1)),
    }
  }

  /// Snapshot of mutations that have not reached a terminal state.
  pub fn in_flight(&self) -> Vec<MutationRecord> {
    let mut records: Vec<MutationRecord> = self.registry().values().cloned().collect();
    records.sort_by_key(|record| record.id);
    records
  }

  // ==========================================================================
  // Create
  // ==========================================================================

  /// Create an issue optimistically.
  ///
  /// A placeholder with a temporary id is prepended to every cached
  /// listing before this returns; the placeholder is replaced by the
  /// server's entity on commit and removed on rollback.
  pub fn dispatch_create(&self, draft: IssueDraft) -> MutationHandle {
    let id = self.allocate(MutationKind::Create);
    let now = Utc::now();
    let temp = temp_id();
    let optimistic = Issue {
      id: temp.clone(),
      title: draft.title.clone(),
      description: draft.description.clone(),
      status: draft.status.unwrap_or(IssueStatus::Open),
      priority: draft.priority.unwrap_or(IssuePriority::Medium),
      severity: draft.severity.unwrap_or(IssueSeverity::Minor),
      created_by: self.actor.clone(),
      assigned_to: draft.assigned_to.clone(),
      resolved_at: None,
      found_date: draft.found_date,
      created_at: now,
      updated_at: now,
    };

    let affected = self.index.affected_by_create();
    let mut touched = Vec::new();
    for key in &affected.patch {
      let mut did_prepend = false;
      let write = self.store.write(key, |entry| {
        let mut next = entry.clone();
        if let Some(CachedValue::Page(page)) = next.value.as_mut() {
          prepend_issue(page, optimistic.clone());
          next.tags.insert(Tag::entity(ResourceKind::Issue, temp.clone()));
          did_prepend = true;
        }
        Ok(next)
      });
      if write.is_ok() && did_prepend {
        touched.push(key.clone());
      }
    }

    debug!(mutation = ?id, temp = %temp, listings = touched.len(), "Optimistic create applied");
    self.mark_applied(
      id,
      InversePatch::Create {
        temp_id: temp,
        keys: touched,
      },
    );

    let (tx, rx) = oneshot::channel();
    let coordinator = self.clone();
    tokio::spawn(async move {
      let result = coordinator.remote.create_issue(&draft).await;
      let outcome = coordinator.resolve_create(id, result);
      let _ = tx.send(outcome);
    });

    MutationHandle { id, receiver: rx }
  }

  fn resolve_create(&self, id: MutationId, result: Result<Issue, RemoteError>) -> MutationOutcome {
    match result {
      Ok(server) => {
        if let Some(record) = self.finish(id, MutationState::Committed) {
          self.commit_create(&record, &server);
          info!(mutation = ?id, issue = %server.id, "Create committed");
        }
        MutationOutcome::Committed {
          entity: Some(server),
        }
      }
      Err(error) => {
        if let Some(record) = self.finish(id, MutationState::RolledBack) {
          if let Some(inverse) = record.inverse.as_ref() {
            inverse.rollback(&self.store);
          }
          warn!(mutation = ?id, %error, "Create rolled back");
        }
        MutationOutcome::RolledBack { error }
      }
    }
  }

  /// Swap the temporary placeholder for the server entity in every
  /// listing the optimistic apply touched. Identity match, not position:
  /// other mutations may have reordered the list in the meantime.
  fn commit_create(&self, record: &MutationRecord, server: &Issue) {
    let Some(InversePatch::Create { temp_id, keys }) = record.inverse.as_ref() else {
      return;
    };
    for key in keys {
      let _ = self.store.write(key, |entry| {
        let mut next = entry.clone();
        if let Some(CachedValue::Page(page)) = next.value.as_mut() {
          if replace_issue(page, temp_id, server.clone()) {
            next.tags.insert(Tag::entity(ResourceKind::Issue, server.id.clone()));
          }
        }
        next.tags.remove(&Tag::entity(ResourceKind::Issue, temp_id.clone()));
        Ok(next)
      });
    }
    self.mark_refetch_stale(&self.index.affected_by_create());
  }

  // ==========================================================================
  // Update
  // ==========================================================================

  /// Update an issue's fields optimistically.
  ///
  /// The projection (patched fields plus a fresh update timestamp) is
  /// applied to the detail entry and every cached listing containing the
  /// issue before this returns. The inverse captures prior values per
  /// field, so rolling back never clobbers concurrent edits to other
  /// fields or other issues.
  pub fn dispatch_update(&self, issue_id: impl Into<String>, patch: IssuePatch) -> MutationHandle {
    let issue_id = issue_id.into();
    let id = self.allocate(MutationKind::Update);
    let now = Utc::now();

    let affected = self.index.affected_by_update(&issue_id);
    let mut snapshots = Vec::new();
    for key in &affected.patch {
      let mut captured = None;
      let write = self.store.write(key, |entry| {
        let mut next = entry.clone();
        match next.value.as_mut() {
          Some(CachedValue::Page(page)) => {
            if let Some(issue) = page.issues.iter_mut().find(|i| i.id == issue_id) {
              captured = Some(patch.invert_for(issue));
              patch.apply_to(issue, now);
            }
          }
          Some(CachedValue::Issue(issue)) if issue.id == issue_id => {
            captured = Some(patch.invert_for(issue));
            patch.apply_to(issue, now);
          }
          _ => {}
        }
        Ok(next)
      });
      if write.is_ok() {
        if let Some(inverse) = captured {
          snapshots.push((key.clone(), inverse));
        }
      }
    }

    debug!(mutation = ?id, issue = %issue_id, occurrences = snapshots.len(), "Optimistic update applied");
    self.mark_applied(
      id,
      InversePatch::Update {
        issue_id: issue_id.clone(),
        snapshots,
      },
    );

    let (tx, rx) = oneshot::channel();
    let coordinator = self.clone();
    tokio::spawn(async move {
      let result = coordinator.remote.update_issue(&issue_id, &patch).await;
      let outcome = coordinator.resolve_update(id, &issue_id, result);
      let _ = tx.send(outcome);
    });

    MutationHandle { id, receiver: rx }
  }

  fn resolve_update(
    &self,
    id: MutationId,
    issue_id: &str,
    result: Result<Issue, RemoteError>,
  ) -> MutationOutcome {
    match result {
      Ok(server) => {
        if self.finish(id, MutationState::Committed).is_some() {
          self.commit_update(issue_id, &server);
          info!(mutation = ?id, issue = %issue_id, "Update committed");
        }
        MutationOutcome::Committed {
          entity: Some(server),
        }
      }
      Err(error) => {
        if let Some(record) = self.finish(id, MutationState::RolledBack) {
          if let Some(inverse) = record.inverse.as_ref() {
            inverse.rollback(&self.store);
          }
          warn!(mutation = ?id, issue = %issue_id, %error, "Update rolled back");
        }
        MutationOutcome::RolledBack { error }
      }
    }
  }

  /// Merge the authoritative entity into the detail entry and every
  /// current listing occurrence. The server copy may carry fields the
  /// optimistic projection could not know, like a resolution timestamp.
  fn commit_update(&self, issue_id: &str, server: &Issue) {
    let affected = self.index.affected_by_update(issue_id);
    for key in &affected.patch {
      let _ = self.store.write(key, |entry| {
        let mut next = entry.clone();
        match next.value.as_mut() {
          Some(CachedValue::Page(page)) => {
            replace_issue(page, issue_id, server.clone());
          }
          Some(CachedValue::Issue(issue)) if issue.id == issue_id => {
            *issue = server.clone();
          }
          _ => {}
        }
        Ok(next)
      });
    }
    self.mark_refetch_stale(&affected);
  }

  // ==========================================================================
  // Delete
  // ==========================================================================

  /// Delete an issue optimistically.
  ///
  /// The issue disappears from every cached listing before this returns.
  /// The inverse keeps a whole prior snapshot per touched listing; a
  /// rollback restores those snapshots even if other optimistic edits
  /// landed on the same listings in between.
  pub fn dispatch_delete(&self, issue_id: impl Into<String>) -> MutationHandle {
    let issue_id = issue_id.into();
    let id = self.allocate(MutationKind::Delete);

    let affected = self.index.affected_by_delete(&issue_id);
    let mut snapshots = Vec::new();
    for key in &affected.patch {
      if !matches!(key, QueryKey::IssueList(_)) {
        continue;
      }
      let mut captured = None;
      let write = self.store.write(key, |entry| {
        let mut next = entry.clone();
        if let Some(CachedValue::Page(page)) = next.value.as_mut() {
          if page.issues.iter().any(|i| i.id == issue_id) {
            captured = Some(ListSnapshot {
              key: key.clone(),
              page: page.clone(),
              tags: next.tags.clone(),
            });
            remove_issue(page, &issue_id);
            next.tags.remove(&Tag::entity(ResourceKind::Issue, issue_id.clone()));
          }
        }
        Ok(next)
      });
      if write.is_ok() {
        if let Some(snapshot) = captured {
          snapshots.push(snapshot);
        }
      }
    }

    debug!(mutation = ?id, issue = %issue_id, listings = snapshots.len(), "Optimistic delete applied");
    self.mark_applied(id, InversePatch::Delete { snapshots });

    let (tx, rx) = oneshot::channel();
    let coordinator = self.clone();
    tokio::spawn(async move {
      let result = coordinator.remote.delete_issue(&issue_id).await;
      let outcome = coordinator.resolve_delete(id, &issue_id, result.map(|_| ()));
      let _ = tx.send(outcome);
    });

    MutationHandle { id, receiver: rx }
  }

  fn resolve_delete(
    &self,
    id: MutationId,
    issue_id: &str,
    result: Result<(), RemoteError>,
  ) -> MutationOutcome {
    match result {
      Ok(()) => {
        if self.finish(id, MutationState::Committed).is_some() {
          // The entity entry, if still cached, goes away with the issue.
          self.store.remove(&QueryKey::issue_detail(issue_id));
          self.mark_refetch_stale(&self.index.affected_by_delete(issue_id));
          info!(mutation = ?id, issue = %issue_id, "Delete committed");
        }
        MutationOutcome::Committed { entity: None }
      }
      Err(error) => {
        if let Some(record) = self.finish(id, MutationState::RolledBack) {
          if let Some(inverse) = record.inverse.as_ref() {
            inverse.rollback(&self.store);
          }
          warn!(mutation = ?id, issue = %issue_id, %error, "Delete rolled back");
        }
        MutationOutcome::RolledBack { error }
      }
    }
  }

  /// Delete several issues as independent mutations.
  ///
  /// Every delete is dispatched (and optimistically applied) before any
  /// outcome is awaited, and each resolves on its own: a partial failure
  /// rolls back only the failed items.
  pub async fn bulk_delete(&self, issue_ids: Vec<String>) -> Vec<(String, MutationOutcome)> {
    let handles: Vec<(String, MutationHandle)> = issue_ids
      .into_iter()
      .map(|issue_id| {
        let handle = self.dispatch_delete(issue_id.clone());
        (issue_id, handle)
      })
      .collect();

    let (ids, outcomes): (Vec<_>, Vec<_>) = handles
      .into_iter()
      .map(|(issue_id, handle)| (issue_id, handle.outcome()))
      .unzip();
    let outcomes = future::join_all(outcomes).await;

    ids.into_iter().zip(outcomes).collect()
  }

  // ==========================================================================
  // Registry plumbing
  // ==========================================================================

  fn registry(&self) -> MutexGuard<'_, HashMap<MutationId, MutationRecord>> {
    match self.in_flight.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!("Recovered from poisoned mutation registry lock");
        poisoned.into_inner()
      }
    }
  }

  fn allocate(&self, kind: MutationKind) -> MutationId {
    let id = MutationId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.registry().insert(
      id,
      MutationRecord {
        id,
        kind,
        state: MutationState::Initiated,
        inverse: None,
      },
    );
    id
  }

  fn mark_applied(&self, id: MutationId, inverse: InversePatch) {
    if let Some(record) = self.registry().get_mut(&id) {
      record.state = MutationState::OptimisticallyApplied;
      record.inverse = Some(inverse);
    }
  }

  /// Take the record out of the registry, assigning its terminal state.
  /// Removal is the exactly-once gate: the first terminal transition
  /// owns the record, a second resolution finds nothing to act on.
  fn finish(&self, id: MutationId, terminal: MutationState) -> Option<MutationRecord> {
    let mut record = self.registry().remove(&id)?;
    record.state = terminal;
    Some(record)
  }

  fn mark_refetch_stale(&self, affected: &Affected) {
    for key in &affected.refetch {
      self.store.mark_stale(key);
    }
  }
}
