//! In-process implementation of the remote boundary.
//!
//! Serves the full `Remote` contract from a vector of issues: filtering,
//! sorting, pagination, status counts, server-side id assignment and
//! resolution stamping. Fault injection makes every failure path of the
//! mutation coordinator reachable from tests without a network.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::{DEFAULT_PAGE, DEFAULT_PAGE_LIMIT};
use crate::error::RemoteError;
use crate::mutation::IssuePatch;
use crate::types::{
  DashboardSnapshot, DeleteReceipt, Issue, IssueDraft, IssueFilter, IssuePage, IssuePriority,
  IssueSeverity, IssueStatus, PageInfo, SortOrder, User,
};

use super::Remote;

/// How many issues the dashboard's recent-activity feed carries.
const RECENT_ACTIVITY_LIMIT: usize = 5;

/// Number of calls served per operation, for cache-behavior assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
  pub lists: u64,
  pub gets: u64,
  pub creates: u64,
  pub updates: u64,
  pub deletes: u64,
  pub dashboards: u64,
}

#[derive(Default)]
struct MemoryInner {
  issues: Vec<Issue>,
  next_id: u64,
  /// Failures consumed by the next operation of any kind, in order.
  queued_failures: VecDeque<RemoteError>,
  /// Failures consumed by the next mutation addressing a specific id.
  issue_failures: HashMap<String, RemoteError>,
  calls: CallCounts,
}

/// Reference tracker living entirely in memory.
pub struct InMemoryRemote {
  inner: Mutex<MemoryInner>,
  actor: User,
  latency: Option<Duration>,
}

impl Default for InMemoryRemote {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryRemote {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(MemoryInner {
        next_id: 1,
        ..MemoryInner::default()
      }),
      actor: User {
        id: "u-srv".to_string(),
        name: "Tracker Service".to_string(),
        email: "service@tracker.example.com".to_string(),
      },
      latency: None,
    }
  }

  /// Seed the tracker with existing issues. Server id assignment starts
  /// past the highest seeded `srv-{n}`.
  pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
    let next_id = issues
      .iter()
      .filter_map(|issue| issue.id.strip_prefix("srv-"))
      .filter_map(|n| n.parse::<u64>().ok())
      .max()
      .map_or(1, |max| max + 1);
    {
      let mut inner = self.lock();
      inner.issues = issues;
      inner.next_id = next_id;
    }
    self
  }

  /// User attributed as creator of issues created through this remote.
  pub fn with_actor(mut self, actor: User) -> Self {
    self.actor = actor;
    self
  }

  /// Sleep this long before serving each call.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Queue a failure for the next operation of any kind.
  pub fn fail_next(&self, error: RemoteError) {
    self.lock().queued_failures.push_back(error);
  }

  /// Fail the next get, update or delete addressing `id`.
  pub fn fail_issue(&self, id: impl Into<String>, error: RemoteError) {
    self.lock().issue_failures.insert(id.into(), error);
  }

  pub fn calls(&self) -> CallCounts {
    self.lock().calls
  }

  /// Current authoritative issue set, newest first.
  pub fn all_issues(&self) -> Vec<Issue> {
    let mut issues = self.lock().issues.clone();
    issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    issues
  }

  pub fn issue_count(&self) -> usize {
    self.lock().issues.len()
  }

  fn lock(&self) -> MutexGuard<'_, MemoryInner> {
    match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  async fn simulate_latency(&self) {
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
  }
}

fn take_failure(inner: &mut MemoryInner, id: Option<&str>) -> Option<RemoteError> {
  if let Some(error) = inner.queued_failures.pop_front() {
    return Some(error);
  }
  id.and_then(|id| inner.issue_failures.remove(id))
}

fn matches_filter(issue: &Issue, filter: &IssueFilter) -> bool {
  if filter.status.is_some_and(|status| issue.status != status) {
    return false;
  }
  if filter
    .priority
    .is_some_and(|priority| issue.priority != priority)
  {
    return false;
  }
  if filter
    .severity
    .is_some_and(|severity| issue.severity != severity)
  {
    return false;
  }
  if let Some(search) = filter.search.as_deref() {
    let needle = search.trim().to_lowercase();
    if !needle.is_empty()
      && !issue.title.to_lowercase().contains(&needle)
      && !issue.description.to_lowercase().contains(&needle)
    {
      return false;
    }
  }
  true
}

fn sort_issues(issues: &mut [Issue], sort_by: Option<&str>, order: SortOrder) {
  match sort_by.unwrap_or("createdAt") {
    "updatedAt" => issues.sort_by(|a, b| a.updated_at.cmp(&b.updated_at)),
    "title" => issues.sort_by(|a, b| a.title.cmp(&b.title)),
    "status" => issues.sort_by(|a, b| a.status.cmp(&b.status)),
    "priority" => issues.sort_by(|a, b| a.priority.cmp(&b.priority)),
    "severity" => issues.sort_by(|a, b| a.severity.cmp(&b.severity)),
    _ => issues.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
  }
  if order == SortOrder::Desc {
    issues.reverse();
  }
}

/// The server stamps `resolved_at` when an issue reaches Resolved and
/// clears it when the issue moves back out.
fn stamp_resolution(issue: &mut Issue) {
  match issue.status {
    IssueStatus::Resolved if issue.resolved_at.is_none() => {
      issue.resolved_at = Some(issue.updated_at);
    }
    IssueStatus::Resolved => {}
    _ => issue.resolved_at = None,
  }
}

#[async_trait]
impl Remote for InMemoryRemote {
  async fn list_issues(&self, filter: &IssueFilter) -> Result<IssuePage, RemoteError> {
    self.simulate_latency().await;
    let mut inner = self.lock();
    inner.calls.lists += 1;
    if let Some(error) = take_failure(&mut inner, None) {
      return Err(error);
    }

    let mut matching: Vec<Issue> = inner
      .issues
      .iter()
      .filter(|issue| matches_filter(issue, filter))
      .cloned()
      .collect();

    let mut status_counts: BTreeMap<IssueStatus, u64> = BTreeMap::new();
    for issue in &matching {
      *status_counts.entry(issue.status).or_default() += 1;
    }

    sort_issues(
      &mut matching,
      filter.sort_by.as_deref(),
      filter.sort_order.unwrap_or(SortOrder::Desc),
    );

    let total = matching.len() as u64;
    let page = filter.page.unwrap_or(DEFAULT_PAGE).max(1);
    let limit = filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
    let pages = (total.div_ceil(limit as u64) as u32).max(1);
    let start = ((page - 1) * limit) as usize;
    let issues: Vec<Issue> = matching
      .into_iter()
      .skip(start)
      .take(limit as usize)
      .collect();

    Ok(IssuePage {
      issues,
      page_info: PageInfo {
        total,
        page,
        pages,
        limit,
      },
      status_counts,
    })
  }

  async fn get_issue(&self, id: &str) -> Result<Issue, RemoteError> {
    self.simulate_latency().await;
    let mut inner = self.lock();
    inner.calls.gets += 1;
    if let Some(error) = take_failure(&mut inner, Some(id)) {
      return Err(error);
    }
    inner
      .issues
      .iter()
      .find(|issue| issue.id == id)
      .cloned()
      .ok_or_else(|| RemoteError::NotFound("Issue not found".to_string()))
  }

  async fn create_issue(&self, draft: &IssueDraft) -> Result<Issue, RemoteError> {
    self.simulate_latency().await;
    let mut inner = self.lock();
    inner.calls.creates += 1;
    if let Some(error) = take_failure(&mut inner, None) {
      return Err(error);
    }

    let now = Utc::now();
    let id = format!("srv-{}", inner.next_id);
    inner.next_id += 1;
    let mut issue = Issue {
      id,
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
    stamp_resolution(&mut issue);
    inner.issues.push(issue.clone());
    Ok(issue)
  }

  async fn update_issue(&self, id: &str, patch: &IssuePatch) -> Result<Issue, RemoteError> {
    self.simulate_latency().await;
    let mut inner = self.lock();
    inner.calls.updates += 1;
    if let Some(error) = take_failure(&mut inner, Some(id)) {
      return Err(error);
    }

    let now = Utc::now();
    let issue = inner
      .issues
      .iter_mut()
      .find(|issue| issue.id == id)
      .ok_or_else(|| RemoteError::NotFound("Issue not found".to_string()))?;
    patch.apply_to(issue, now);
    stamp_resolution(issue);
    Ok(issue.clone())
  }

  async fn delete_issue(&self, id: &str) -> Result<DeleteReceipt, RemoteError> {
    self.simulate_latency().await;
    let mut inner = self.lock();
    inner.calls.deletes += 1;
    if let Some(error) = take_failure(&mut inner, Some(id)) {
      return Err(error);
    }

    let before = inner.issues.len();
    inner.issues.retain(|issue| issue.id != id);
    if inner.issues.len() == before {
      return Err(RemoteError::NotFound("Issue not found".to_string()));
    }
    Ok(DeleteReceipt {
      message: "Issue deleted successfully".to_string(),
    })
  }

  async fn get_dashboard(&self) -> Result<DashboardSnapshot, RemoteError> {
    self.simulate_latency().await;
    let mut inner = self.lock();
    inner.calls.dashboards += 1;
    if let Some(error) = take_failure(&mut inner, None) {
      return Err(error);
    }

    let mut by_status: BTreeMap<IssueStatus, u64> = BTreeMap::new();
    let mut by_priority: BTreeMap<IssuePriority, u64> = BTreeMap::new();
    let mut by_severity: BTreeMap<IssueSeverity, u64> = BTreeMap::new();
    for issue in &inner.issues {
      *by_status.entry(issue.status).or_default() += 1;
      *by_priority.entry(issue.priority).or_default() += 1;
      *by_severity.entry(issue.severity).or_default() += 1;
    }

    let mut recent = inner.issues.clone();
    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    recent.truncate(RECENT_ACTIVITY_LIMIT);

    Ok(DashboardSnapshot {
      total_issues: inner.issues.len() as u64,
      by_status,
      by_priority,
      by_severity,
      recent_activity: recent,
    })
  }
}
