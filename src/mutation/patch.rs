//! Reversible edits: field patches, inverse records, temporary ids.
//!
//! Every optimistic application captures an `InversePatch` at the same
//! time as the forward edit. The inverse is a plain value holding exactly
//! the data its mutation kind needs to undo itself, so rollback never
//! replays closures or UI callbacks.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::{CacheStore, CachedValue, QueryKey, ResourceKind, Tag};
use crate::types::{Issue, IssuePage, IssuePriority, IssueSeverity, IssueStatus, User};

// ============================================================================
// Temporary identity
// ============================================================================

/// Reserved prefix marking ids assigned locally before the server has
/// confirmed a create. Server ids never start with it.
pub const TEMP_ID_PREFIX: &str = "temp-";

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

/// Mint a process-unique temporary id.
pub fn temp_id() -> String {
  let n = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
  format!("{}{}", TEMP_ID_PREFIX, n)
}

/// True if `id` was assigned locally and not yet confirmed by the server.
pub fn is_temp_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

// ============================================================================
// Field patches
// ============================================================================

/// A single field edit: keep the current value or set a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
  Keep,
  Set(T),
}

impl<T> Default for Field<T> {
  fn default() -> Self {
    Self::Keep
  }
}

impl<T: Clone> Field<T> {
  pub fn is_set(&self) -> bool {
    matches!(self, Self::Set(_))
  }

  fn apply_to(&self, slot: &mut T) {
    if let Self::Set(value) = self {
      *slot = value.clone();
    }
  }

  /// Capture the prior value iff this edit would overwrite it.
  fn capture(&self, current: &T) -> Field<T> {
    match self {
      Self::Keep => Self::Keep,
      Self::Set(_) => Self::Set(current.clone()),
    }
  }
}

/// Partial update of an issue's mutable fields.
///
/// Server-computed fields (`resolved_at`, `created_at`, `created_by`)
/// cannot be patched; they arrive with the authoritative entity on
/// commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuePatch {
  pub title: Field<String>,
  pub description: Field<String>,
  pub status: Field<IssueStatus>,
  pub priority: Field<IssuePriority>,
  pub severity: Field<IssueSeverity>,
  pub assigned_to: Field<Option<User>>,
  pub found_date: Field<Option<DateTime<Utc>>>,
}

impl IssuePatch {
  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.title = Field::Set(title.into());
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = Field::Set(description.into());
    self
  }

  pub fn status(mut self, status: IssueStatus) -> Self {
    self.status = Field::Set(status);
    self
  }

  pub fn priority(mut self, priority: IssuePriority) -> Self {
    self.priority = Field::Set(priority);
    self
  }

  pub fn severity(mut self, severity: IssueSeverity) -> Self {
    self.severity = Field::Set(severity);
    self
  }

  pub fn assigned_to(mut self, assignee: Option<User>) -> Self {
    self.assigned_to = Field::Set(assignee);
    self
  }

  pub fn found_date(mut self, found: Option<DateTime<Utc>>) -> Self {
    self.found_date = Field::Set(found);
    self
  }

  fn apply_fields(&self, issue: &mut Issue) {
    self.title.apply_to(&mut issue.title);
    self.description.apply_to(&mut issue.description);
    self.status.apply_to(&mut issue.status);
    self.priority.apply_to(&mut issue.priority);
    self.severity.apply_to(&mut issue.severity);
    self.assigned_to.apply_to(&mut issue.assigned_to);
    self.found_date.apply_to(&mut issue.found_date);
  }

  /// Optimistic projection of this patch onto one issue occurrence:
  /// set the patched fields and stamp the update time.
  pub fn apply_to(&self, issue: &mut Issue, now: DateTime<Utc>) {
    self.apply_fields(issue);
    issue.updated_at = now;
  }

  /// Capture the inverse for one occurrence before applying: the prior
  /// values of exactly the fields this patch sets, plus the prior update
  /// timestamp. Untouched fields stay `Keep` so restoring never clobbers
  /// edits made by other concurrent mutations.
  pub fn invert_for(&self, issue: &Issue) -> IssueInverse {
    IssueInverse {
      fields: IssuePatch {
        title: self.title.capture(&issue.title),
        description: self.description.capture(&issue.description),
        status: self.status.capture(&issue.status),
        priority: self.priority.capture(&issue.priority),
        severity: self.severity.capture(&issue.severity),
        assigned_to: self.assigned_to.capture(&issue.assigned_to),
        found_date: self.found_date.capture(&issue.found_date),
      },
      updated_at: issue.updated_at,
    }
  }
}

/// Field-level snapshot undoing one `IssuePatch` application.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueInverse {
  fields: IssuePatch,
  updated_at: DateTime<Utc>,
}

impl IssueInverse {
  pub fn restore_to(&self, issue: &mut Issue) {
    self.fields.apply_fields(issue);
    issue.updated_at = self.updated_at;
  }
}

// ============================================================================
// List edits
// ============================================================================

/// Prepend `issue` to a listing and bump its reported total.
/// Status counts are left alone; the next fetch corrects them.
pub fn prepend_issue(page: &mut IssuePage, issue: Issue) {
  page.issues.insert(0, issue);
  page.page_info.total += 1;
}

/// Remove the issue `id` from a listing, decrementing the total when it
/// was present. Returns true if the listing changed.
pub fn remove_issue(page: &mut IssuePage, id: &str) -> bool {
  let before = page.issues.len();
  page.issues.retain(|issue| issue.id != id);
  let removed = page.issues.len() < before;
  if removed {
    page.page_info.total = page.page_info.total.saturating_sub(1);
  }
  removed
}

/// Replace the issue matching `id` wholesale, by identity rather than
/// position. Returns true when a replacement happened.
pub fn replace_issue(page: &mut IssuePage, id: &str, replacement: Issue) -> bool {
  match page.issues.iter_mut().find(|issue| issue.id == id) {
    Some(slot) => {
      *slot = replacement;
      true
    }
    None => false,
  }
}

// ============================================================================
// Inverse patches
// ============================================================================

/// Prior state of one listing touched by a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot {
  pub key: QueryKey,
  pub page: IssuePage,
  pub tags: BTreeSet<Tag>,
}

/// Inverse of one mutation's optimistic application, one variant per
/// mutation kind, carrying exactly the data needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub enum InversePatch {
  /// Undo a create: drop the temporary issue from every listing it was
  /// prepended to and put the totals back.
  Create {
    temp_id: String,
    keys: Vec<QueryKey>,
  },
  /// Undo an update: restore the captured fields per touched key.
  Update {
    issue_id: String,
    snapshots: Vec<(QueryKey, IssueInverse)>,
  },
  /// Undo a delete: restore each touched listing to its prior contents.
  /// Whole-list restore is deliberate; reinserting at a remembered index
  /// is not stable under concurrent optimistic edits.
  Delete { snapshots: Vec<ListSnapshot> },
}

impl InversePatch {
  /// Undo the optimistic application this inverse was captured from.
  ///
  /// Pure with respect to the coordinator: only the store is touched, so
  /// rollback exactness is testable without an in-flight mutation.
  pub fn rollback(&self, store: &CacheStore) {
    match self {
      Self::Create { temp_id, keys } => {
        for key in keys {
          let _ = store.write(key, |entry| {
            let mut next = entry.clone();
            if let Some(CachedValue::Page(page)) = next.value.as_mut() {
              remove_issue(page, temp_id);
            }
            next.tags.remove(&Tag::entity(ResourceKind::Issue, temp_id.clone()));
            Ok(next)
          });
        }
      }
      Self::Update {
        issue_id,
        snapshots,
      } => {
        for (key, inverse) in snapshots {
          let _ = store.write(key, |entry| {
            let mut next = entry.clone();
            match next.value.as_mut() {
              Some(CachedValue::Page(page)) => {
                if let Some(issue) = page.issues.iter_mut().find(|i| i.id == *issue_id) {
                  inverse.restore_to(issue);
                }
              }
              Some(CachedValue::Issue(issue)) if issue.id == *issue_id => {
                inverse.restore_to(issue);
              }
              _ => {}
            }
            Ok(next)
          });
        }
      }
      Self::Delete { snapshots } => {
        for snapshot in snapshots {
          let _ = store.write(&snapshot.key, |entry| {
            let mut next = entry.clone();
            next.value = Some(CachedValue::Page(snapshot.page.clone()));
            next.tags = snapshot.tags.clone();
            Ok(next)
          });
        }
      }
    }
  }

  /// Keys this inverse would touch on rollback.
  pub fn touched_keys(&self) -> Vec<QueryKey> {
    match self {
      Self::Create { keys, .. } => keys.clone(),
      Self::Update { snapshots, .. } => snapshots.iter().map(|(key, _)| key.clone()).collect(),
      Self::Delete { snapshots } => snapshots.iter().map(|s| s.key.clone()).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, CacheStore, FetchStatus};
  use crate::types::{IssueFilter, PageInfo};
  use std::collections::BTreeMap;

  fn sample_user(name: &str) -> User {
    User {
      id: format!("u-{}", name),
      name: name.to_string(),
      email: format!("{}@example.com", name),
    }
  }

  fn sample_issue(id: &str, title: &str) -> Issue {
    let now = Utc::now();
    Issue {
      id: id.to_string(),
      title: title.to_string(),
      description: String::new(),
      status: IssueStatus::Open,
      priority: IssuePriority::Medium,
      severity: IssueSeverity::Minor,
      created_by: sample_user("reporter"),
      assigned_to: None,
      resolved_at: None,
      found_date: None,
      created_at: now,
      updated_at: now,
    }
  }

  fn page_of(issues: Vec<Issue>) -> IssuePage {
    let total = issues.len() as u64;
    IssuePage {
      issues,
      page_info: PageInfo {
        total,
        page: 1,
        pages: 1,
        limit: 10,
      },
      status_counts: BTreeMap::new(),
    }
  }

  fn page_entry(page: IssuePage) -> CacheEntry {
    let mut tags: BTreeSet<Tag> = page
      .issues
      .iter()
      .map(|issue| Tag::entity(ResourceKind::Issue, issue.id.clone()))
      .collect();
    tags.insert(Tag::kind(ResourceKind::Issue));
    CacheEntry {
      value: Some(CachedValue::Page(page)),
      status: FetchStatus::Ready,
      stale: false,
      tags,
      version: 0,
    }
  }

  #[test]
  fn test_temp_ids_are_unique_and_prefixed() {
    let a = temp_id();
    let b = temp_id();
    assert_ne!(a, b);
    assert!(is_temp_id(&a));
    assert!(is_temp_id(&b));
    assert!(!is_temp_id("srv-42"));
  }

  #[test]
  fn test_patch_sets_fields_and_stamps_timestamp() {
    let mut issue = sample_issue("srv-1", "Login broken");
    let before = issue.updated_at;
    let now = before + chrono::Duration::seconds(5);

    let patch = IssuePatch::default()
      .status(IssueStatus::Closed)
      .assigned_to(Some(sample_user("dana")));
    patch.apply_to(&mut issue, now);

    assert_eq!(issue.status, IssueStatus::Closed);
    assert_eq!(issue.assigned_to, Some(sample_user("dana")));
    assert_eq!(issue.updated_at, now);
    // Untouched fields keep their values.
    assert_eq!(issue.title, "Login broken");
    assert_eq!(issue.priority, IssuePriority::Medium);
  }

  #[test]
  fn test_inverse_restores_only_touched_fields() {
    let mut issue = sample_issue("srv-1", "Login broken");
    let original_updated = issue.updated_at;

    let patch = IssuePatch::default().status(IssueStatus::Closed);
    let inverse = patch.invert_for(&issue);
    patch.apply_to(&mut issue, original_updated + chrono::Duration::seconds(5));

    // A different concurrent edit lands on an untouched field.
    issue.title = "Login broken on Safari".to_string();

    inverse.restore_to(&mut issue);
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.updated_at, original_updated);
    // The concurrent edit survives the rollback.
    assert_eq!(issue.title, "Login broken on Safari");
  }

  #[test]
  fn test_prepend_and_remove_adjust_total() {
    let mut page = page_of(vec![sample_issue("srv-1", "a"), sample_issue("srv-2", "b")]);

    prepend_issue(&mut page, sample_issue("temp-9", "new"));
    assert_eq!(page.issues[0].id, "temp-9");
    assert_eq!(page.page_info.total, 3);

    assert!(remove_issue(&mut page, "temp-9"));
    assert_eq!(page.issues.len(), 2);
    assert_eq!(page.page_info.total, 2);

    assert!(!remove_issue(&mut page, "srv-404"));
    assert_eq!(page.page_info.total, 2);
  }

  #[test]
  fn test_replace_matches_identity_not_position() {
    let mut page = page_of(vec![sample_issue("srv-1", "a"), sample_issue("temp-3", "new")]);

    // Another mutation shuffles the list before the replace lands.
    page.issues.swap(0, 1);

    assert!(replace_issue(&mut page, "temp-3", sample_issue("srv-42", "new")));
    assert!(page.issues.iter().any(|i| i.id == "srv-42"));
    assert!(!page.issues.iter().any(|i| i.id == "temp-3"));
    assert!(!replace_issue(&mut page, "temp-3", sample_issue("srv-43", "x")));
  }

  #[test]
  fn test_create_inverse_removes_temp_issue() {
    let store = CacheStore::new();
    let key = QueryKey::issue_list(&IssueFilter::default());

    let mut page = page_of(vec![sample_issue("srv-1", "a")]);
    prepend_issue(&mut page, sample_issue("temp-7", "draft"));
    let mut entry = page_entry(page);
    entry.tags.insert(Tag::entity(ResourceKind::Issue, "temp-7"));
    store.write(&key, |_| Ok(entry.clone())).unwrap();

    let inverse = InversePatch::Create {
      temp_id: "temp-7".to_string(),
      keys: vec![key.clone()],
    };
    inverse.rollback(&store);

    let rolled = store.read(&key).unwrap();
    let page = rolled.value.unwrap();
    let page = page.as_page().unwrap();
    assert_eq!(page.issues.len(), 1);
    assert_eq!(page.issues[0].id, "srv-1");
    assert_eq!(page.page_info.total, 1);
    assert!(!rolled.tags.contains(&Tag::entity(ResourceKind::Issue, "temp-7")));
  }

  #[test]
  fn test_update_inverse_restores_fields_across_keys() {
    let store = CacheStore::new();
    let list_key = QueryKey::issue_list(&IssueFilter::default());
    let detail_key = QueryKey::issue_detail("srv-1");

    let mut listed = sample_issue("srv-1", "a");
    let patch = IssuePatch::default().status(IssueStatus::Resolved);
    let list_inverse = patch.invert_for(&listed);
    let detail_inverse = patch.invert_for(&listed);
    let now = listed.updated_at + chrono::Duration::seconds(5);
    patch.apply_to(&mut listed, now);

    store
      .write(&list_key, |_| Ok(page_entry(page_of(vec![listed.clone()]))))
      .unwrap();
    store
      .write(&detail_key, |_| {
        Ok(CacheEntry {
          value: Some(CachedValue::Issue(listed.clone())),
          status: FetchStatus::Ready,
          stale: false,
          tags: [Tag::entity(ResourceKind::Issue, "srv-1")].into_iter().collect(),
          version: 0,
        })
      })
      .unwrap();

    let inverse = InversePatch::Update {
      issue_id: "srv-1".to_string(),
      snapshots: vec![(list_key.clone(), list_inverse), (detail_key.clone(), detail_inverse)],
    };
    inverse.rollback(&store);

    let list_entry = store.read(&list_key).unwrap();
    let page = list_entry.value.as_ref().unwrap().as_page().unwrap().clone();
    assert_eq!(page.issues[0].status, IssueStatus::Open);

    let detail_entry = store.read(&detail_key).unwrap();
    let issue = detail_entry.value.as_ref().unwrap().as_issue().unwrap().clone();
    assert_eq!(issue.status, IssueStatus::Open);
  }

  #[test]
  fn test_delete_inverse_restores_whole_list() {
    let store = CacheStore::new();
    let key = QueryKey::issue_list(&IssueFilter::default());

    let original = page_of(vec![sample_issue("srv-1", "a"), sample_issue("srv-2", "b")]);
    let entry = page_entry(original.clone());
    let snapshot = ListSnapshot {
      key: key.clone(),
      page: original.clone(),
      tags: entry.tags.clone(),
    };

    // Apply the optimistic removal.
    store
      .write(&key, |_| {
        let mut next = entry.clone();
        if let Some(CachedValue::Page(page)) = next.value.as_mut() {
          remove_issue(page, "srv-2");
        }
        next.tags.remove(&Tag::entity(ResourceKind::Issue, "srv-2"));
        Ok(next)
      })
      .unwrap();

    InversePatch::Delete {
      snapshots: vec![snapshot],
    }
    .rollback(&store);

    let restored = store.read(&key).unwrap();
    let page = restored.value.as_ref().unwrap().as_page().unwrap();
    assert_eq!(page, &original);
    assert!(restored.tags.contains(&Tag::entity(ResourceKind::Issue, "srv-2")));
  }
}
