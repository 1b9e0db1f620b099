//! End-to-end optimistic mutation flows against the in-memory remote:
//! optimistic visibility, exact rollback, commit reconciliation and
//! partial bulk failure.

use std::sync::Arc;

use chrono::{Duration, Utc};
use trackstore::cache::{CacheEvent, FetchStatus, QueryKey, ResourceKind};
use trackstore::error::RemoteError;
use trackstore::mutation::{is_temp_id, IssuePatch, MutationState};
use trackstore::remote::InMemoryRemote;
use trackstore::types::{
  Issue, IssueDraft, IssueFilter, IssuePage, IssuePriority, IssueSeverity, IssueStatus, User,
};
use trackstore::TrackerClient;

fn init_logging() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

fn actor() -> User {
  User {
    id: "u-me".to_string(),
    name: "Me".to_string(),
    email: "me@example.com".to_string(),
  }
}

fn sample_issue(id: &str, title: &str, status: IssueStatus, age_minutes: i64) -> Issue {
  let created = Utc::now() - Duration::minutes(age_minutes);
  Issue {
    id: id.to_string(),
    title: title.to_string(),
    description: String::new(),
    status,
    priority: IssuePriority::Medium,
    severity: IssueSeverity::Minor,
    created_by: actor(),
    assigned_to: None,
    resolved_at: None,
    found_date: None,
    created_at: created,
    updated_at: created,
  }
}

fn open_issues(count: usize) -> Vec<Issue> {
  (1..=count)
    .map(|n| {
      sample_issue(
        &format!("srv-{}", n),
        &format!("Issue {}", n),
        IssueStatus::Open,
        (count - n + 1) as i64,
      )
    })
    .collect()
}

fn seeded(issues: Vec<Issue>) -> (Arc<InMemoryRemote>, TrackerClient) {
  init_logging();
  let remote = Arc::new(InMemoryRemote::new().with_issues(issues));
  let client = TrackerClient::new(remote.clone(), actor());
  (remote, client)
}

fn cached_page(client: &TrackerClient, key: &QueryKey) -> IssuePage {
  client
    .store()
    .read(key)
    .and_then(|entry| entry.value)
    .and_then(|value| value.as_page().cloned())
    .expect("page cached")
}

fn cached_issue(client: &TrackerClient, key: &QueryKey) -> Issue {
  client
    .store()
    .read(key)
    .and_then(|entry| entry.value)
    .and_then(|value| value.as_issue().cloned())
    .expect("issue cached")
}

/// True if any cached listing or detail entry holds a temporary id.
fn store_holds_temp_id(client: &TrackerClient) -> bool {
  client
    .store()
    .keys_of_kind(ResourceKind::Issue)
    .into_iter()
    .filter_map(|key| client.store().read(&key))
    .filter_map(|entry| entry.value)
    .any(|value| match value {
      trackstore::cache::CachedValue::Page(page) => {
        page.issues.iter().any(|issue| is_temp_id(&issue.id))
      }
      trackstore::cache::CachedValue::Issue(issue) => is_temp_id(&issue.id),
      trackstore::cache::CachedValue::Dashboard(_) => false,
    })
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_is_visible_before_io_and_reconciled_on_commit() {
  let (_remote, client) = seeded(open_issues(3));
  let filter = IssueFilter::default().status(IssueStatus::Open);
  let key = QueryKey::issue_list(&filter);
  client.issues(&filter).await.unwrap();

  let handle = client.create_issue(IssueDraft {
    title: "X".to_string(),
    ..IssueDraft::default()
  });

  // Optimistic apply is synchronous: no await has happened yet.
  let page = cached_page(&client, &key);
  assert_eq!(page.issues.len(), 4);
  assert_eq!(page.page_info.total, 4);
  assert!(is_temp_id(&page.issues[0].id));
  assert_eq!(page.issues[0].title, "X");
  assert_eq!(page.issues[0].created_by, actor());

  let outcome = handle.outcome().await;
  assert!(outcome.is_committed());

  // Commit swapped the placeholder for the server entity in place.
  let page = cached_page(&client, &key);
  assert_eq!(page.issues.len(), 4);
  assert_eq!(page.issues[0].id, "srv-4");
  assert!(!store_holds_temp_id(&client));
}

#[tokio::test]
async fn test_create_failure_restores_every_listing_exactly() {
  let (remote, client) = seeded(open_issues(3));
  let open_filter = IssueFilter::default().status(IssueStatus::Open);
  let all_filter = IssueFilter::default();
  let open_key = QueryKey::issue_list(&open_filter);
  let all_key = QueryKey::issue_list(&all_filter);
  client.issues(&open_filter).await.unwrap();
  client.issues(&all_filter).await.unwrap();

  let open_before = client.store().read(&open_key).unwrap();
  let all_before = client.store().read(&all_key).unwrap();

  remote.fail_next(RemoteError::Api {
    status: 422,
    message: "Title is required".to_string(),
  });
  let handle = client.create_issue(IssueDraft::default());

  // Both listings carry the placeholder while the call is in flight.
  assert_eq!(cached_page(&client, &open_key).issues.len(), 4);
  assert_eq!(cached_page(&client, &all_key).issues.len(), 4);

  let outcome = handle.outcome().await;
  match outcome {
    trackstore::MutationOutcome::RolledBack { error } => {
      assert_eq!(
        error,
        RemoteError::Api {
          status: 422,
          message: "Title is required".to_string(),
        }
      );
    }
    other => panic!("expected rollback, got {:?}", other),
  }

  // Deep equality with the pre-mutation entries, versions aside.
  let open_after = client.store().read(&open_key).unwrap();
  let all_after = client.store().read(&all_key).unwrap();
  assert!(open_after.same_observable(&open_before));
  assert!(all_after.same_observable(&all_before));
  assert!(!store_holds_temp_id(&client));
}

#[tokio::test]
async fn test_create_with_cold_cache_still_commits() {
  let (remote, client) = seeded(Vec::new());

  let outcome = client
    .create_issue(IssueDraft {
      title: "First ever".to_string(),
      ..IssueDraft::default()
    })
    .outcome()
    .await;

  assert!(outcome.is_committed());
  assert_eq!(remote.issue_count(), 1);

  let page = client.issues(&IssueFilter::default()).await.unwrap();
  assert_eq!(page.issues.len(), 1);
  assert_eq!(page.issues[0].title, "First ever");
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_failure_reverts_all_occurrences() {
  let issues = vec![
    sample_issue("srv-7", "Flaky logout", IssueStatus::Open, 10),
    sample_issue("srv-8", "Broken chart", IssueStatus::Closed, 5),
  ];
  let (remote, client) = seeded(issues);

  let open_filter = IssueFilter::default().status(IssueStatus::Open);
  let all_filter = IssueFilter::default();
  let open_key = QueryKey::issue_list(&open_filter);
  let all_key = QueryKey::issue_list(&all_filter);
  let detail_key = QueryKey::issue_detail("srv-7");
  client.issues(&open_filter).await.unwrap();
  client.issues(&all_filter).await.unwrap();
  client.issue("srv-7").await.unwrap();

  let detail_before = cached_issue(&client, &detail_key);

  remote.fail_issue(
    "srv-7",
    RemoteError::Transport("connection timed out".to_string()),
  );
  let handle = client.update_issue("srv-7", IssuePatch::default().status(IssueStatus::Closed));

  // Optimistic projection hits every occurrence.
  let find = |page: &IssuePage| {
    page
      .issues
      .iter()
      .find(|issue| issue.id == "srv-7")
      .cloned()
      .expect("srv-7 listed")
  };
  assert_eq!(find(&cached_page(&client, &open_key)).status, IssueStatus::Closed);
  assert_eq!(find(&cached_page(&client, &all_key)).status, IssueStatus::Closed);
  assert_eq!(cached_issue(&client, &detail_key).status, IssueStatus::Closed);

  let outcome = handle.outcome().await;
  assert!(!outcome.is_committed());

  // All three entries show the pre-update fields again.
  assert_eq!(find(&cached_page(&client, &open_key)).status, IssueStatus::Open);
  assert_eq!(find(&cached_page(&client, &all_key)).status, IssueStatus::Open);
  assert_eq!(cached_issue(&client, &detail_key), detail_before);
}

#[tokio::test]
async fn test_update_commit_merges_server_computed_fields() {
  let (_remote, client) = seeded(open_issues(2));
  let filter = IssueFilter::default();
  let key = QueryKey::issue_list(&filter);
  let detail_key = QueryKey::issue_detail("srv-1");
  client.issues(&filter).await.unwrap();
  client.issue("srv-1").await.unwrap();

  let outcome = client
    .update_issue("srv-1", IssuePatch::default().status(IssueStatus::Resolved))
    .outcome()
    .await;
  assert!(outcome.is_committed());

  // The optimistic projection could not know resolved_at; the committed
  // entity carries it into every occurrence.
  let listed = cached_page(&client, &key)
    .issues
    .into_iter()
    .find(|issue| issue.id == "srv-1")
    .unwrap();
  assert_eq!(listed.status, IssueStatus::Resolved);
  assert!(listed.resolved_at.is_some());
  assert!(cached_issue(&client, &detail_key).resolved_at.is_some());
}

#[tokio::test]
async fn test_overlapping_updates_to_different_fields() {
  let (remote, client) = seeded(open_issues(1));
  let filter = IssueFilter::default();
  let key = QueryKey::issue_list(&filter);
  client.issues(&filter).await.unwrap();
  let original_title = cached_page(&client, &key).issues[0].title.clone();

  // The title edit fails, the status edit lands; both windows overlap.
  remote.fail_issue(
    "srv-1",
    RemoteError::Api {
      status: 422,
      message: "Title is required".to_string(),
    },
  );
  let title_edit = client.update_issue("srv-1", IssuePatch::default().title(""));
  let status_edit =
    client.update_issue("srv-1", IssuePatch::default().status(IssueStatus::InProgress));

  let (title_outcome, status_outcome) =
    tokio::join!(title_edit.outcome(), status_edit.outcome());
  assert!(!title_outcome.is_committed());
  assert!(status_outcome.is_committed());

  // The failed edit reverted only its own field.
  let issue = cached_page(&client, &key).issues[0].clone();
  assert_eq!(issue.title, original_title);
  assert_eq!(issue.status, IssueStatus::InProgress);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_commit_drops_listing_entry_and_detail() {
  let (remote, client) = seeded(open_issues(3));
  let filter = IssueFilter::default();
  let key = QueryKey::issue_list(&filter);
  let detail_key = QueryKey::issue_detail("srv-2");
  client.issues(&filter).await.unwrap();
  client.issue("srv-2").await.unwrap();

  let handle = client.delete_issue("srv-2");

  let page = cached_page(&client, &key);
  assert_eq!(page.issues.len(), 2);
  assert_eq!(page.page_info.total, 2);
  assert!(!page.issues.iter().any(|issue| issue.id == "srv-2"));

  assert!(handle.outcome().await.is_committed());
  assert!(client.store().read(&detail_key).is_none());
  assert_eq!(remote.issue_count(), 2);
}

#[tokio::test]
async fn test_delete_failure_restores_list_order_and_total() {
  let (remote, client) = seeded(open_issues(3));
  let filter = IssueFilter::default();
  let key = QueryKey::issue_list(&filter);
  client.issues(&filter).await.unwrap();
  let before = client.store().read(&key).unwrap();

  remote.fail_issue(
    "srv-2",
    RemoteError::Api {
      status: 403,
      message: "Not allowed".to_string(),
    },
  );
  let outcome = client.delete_issue("srv-2").outcome().await;
  assert!(!outcome.is_committed());

  let after = client.store().read(&key).unwrap();
  assert!(after.same_observable(&before));
  assert_eq!(remote.issue_count(), 3);
}

#[tokio::test]
async fn test_bulk_delete_partial_failure_is_independent() {
  let (remote, client) = seeded(open_issues(5));
  let filter = IssueFilter::default();
  let key = QueryKey::issue_list(&filter);
  client.issues(&filter).await.unwrap();

  remote.fail_issue(
    "srv-5",
    RemoteError::Transport("connection reset".to_string()),
  );
  let outcomes = client
    .bulk_delete(vec![
      "srv-1".to_string(),
      "srv-2".to_string(),
      "srv-5".to_string(),
    ])
    .await;

  let committed: Vec<&str> = outcomes
    .iter()
    .filter(|(_, outcome)| outcome.is_committed())
    .map(|(id, _)| id.as_str())
    .collect();
  assert_eq!(committed, vec!["srv-1", "srv-2"]);

  // Only the successful deletions persist: 5 - 2 issues remain, with
  // the failed one restored.
  let page = cached_page(&client, &key);
  assert_eq!(page.issues.len(), 3);
  assert_eq!(page.page_info.total, 3);
  assert!(page.issues.iter().any(|issue| issue.id == "srv-5"));
  assert_eq!(remote.issue_count(), 3);
}

// ============================================================================
// Lifecycle and notifications
// ============================================================================

#[tokio::test]
async fn test_mutation_resolves_exactly_once() {
  let (_remote, client) = seeded(open_issues(1));
  client.issues(&IssueFilter::default()).await.unwrap();

  let handle = client.delete_issue("srv-1");

  let records = client.in_flight();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].state, MutationState::OptimisticallyApplied);

  handle.outcome().await;
  assert!(client.in_flight().is_empty());
}

#[tokio::test]
async fn test_listing_subscribers_see_two_writes_per_mutation() {
  let (remote, client) = seeded(open_issues(2));
  let filter = IssueFilter::default();
  let key = QueryKey::issue_list(&filter);
  client.issues(&filter).await.unwrap();

  let mut sub = client.subscribe(&key);

  // Success: optimistic apply, then commit merge.
  client
    .update_issue("srv-1", IssuePatch::default().status(IssueStatus::Closed))
    .outcome()
    .await;
  assert!(matches!(sub.try_next(), Some(CacheEvent::Updated { .. })));
  assert!(matches!(sub.try_next(), Some(CacheEvent::Updated { .. })));
  assert!(sub.try_next().is_none());

  // Failure: optimistic apply, then rollback.
  remote.fail_issue(
    "srv-1",
    RemoteError::Transport("connection reset".to_string()),
  );
  client
    .update_issue("srv-1", IssuePatch::default().status(IssueStatus::Open))
    .outcome()
    .await;
  assert!(matches!(sub.try_next(), Some(CacheEvent::Updated { .. })));
  assert!(matches!(sub.try_next(), Some(CacheEvent::Updated { .. })));
  assert!(sub.try_next().is_none());
}

// ============================================================================
// Dashboard invalidation
// ============================================================================

#[tokio::test]
async fn test_commit_marks_dashboard_stale_and_next_read_refetches() {
  let (remote, client) = seeded(open_issues(2));
  client.dashboard().await.unwrap();
  client.issues(&IssueFilter::default()).await.unwrap();

  client
    .update_issue("srv-1", IssuePatch::default().status(IssueStatus::Closed))
    .outcome()
    .await;

  let entry = client.store().read(&QueryKey::Dashboard).unwrap();
  assert!(entry.stale);

  let dashboard = client.dashboard().await.unwrap();
  assert_eq!(remote.calls().dashboards, 2);
  assert_eq!(dashboard.by_status.get(&IssueStatus::Closed), Some(&1));
  assert!(!client.store().read(&QueryKey::Dashboard).unwrap().stale);
}

#[tokio::test]
async fn test_rollback_leaves_dashboard_untouched() {
  let (remote, client) = seeded(open_issues(2));
  client.dashboard().await.unwrap();
  client.issues(&IssueFilter::default()).await.unwrap();

  remote.fail_issue(
    "srv-1",
    RemoteError::Transport("connection reset".to_string()),
  );
  client
    .update_issue("srv-1", IssuePatch::default().status(IssueStatus::Closed))
    .outcome()
    .await;

  let entry = client.store().read(&QueryKey::Dashboard).unwrap();
  assert!(!entry.stale);
  assert!(matches!(entry.status, FetchStatus::Ready));

  client.dashboard().await.unwrap();
  assert_eq!(remote.calls().dashboards, 1);
}
