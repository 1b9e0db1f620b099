//! Domain types for the issue tracker.
//!
//! These are the application-facing shapes held in the cache. Wire types
//! live in `remote::api_types` and convert into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Enumerated fields
// ============================================================================

/// Workflow status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueStatus {
  Open,
  #[serde(rename = "In Progress")]
  InProgress,
  Resolved,
  Closed,
}

impl IssueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Open => "Open",
      Self::InProgress => "In Progress",
      Self::Resolved => "Resolved",
      Self::Closed => "Closed",
    }
  }
}

impl fmt::Display for IssueStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssuePriority {
  Low,
  Medium,
  High,
}

impl IssuePriority {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Low => "Low",
      Self::Medium => "Medium",
      Self::High => "High",
    }
  }
}

impl fmt::Display for IssuePriority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueSeverity {
  Minor,
  Major,
  Critical,
}

impl IssueSeverity {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Minor => "Minor",
      Self::Major => "Major",
      Self::Critical => "Critical",
    }
  }
}

impl fmt::Display for IssueSeverity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ============================================================================
// Entities
// ============================================================================

/// A tracker user, embedded in issues as creator or assignee.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
  pub id: String,
  pub name: String,
  pub email: String,
}

/// Full issue entity as served by the tracker API.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
  /// Server-assigned identifier. Optimistically created issues carry a
  /// temporary id (see `mutation::temp_id`) until the server responds.
  pub id: String,
  pub title: String,
  pub description: String,
  pub status: IssueStatus,
  pub priority: IssuePriority,
  pub severity: IssueSeverity,
  pub created_by: User,
  pub assigned_to: Option<User>,
  /// Set by the server when the issue transitions to Resolved.
  pub resolved_at: Option<DateTime<Utc>>,
  pub found_date: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// One page of a filtered issue listing.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuePage {
  pub issues: Vec<Issue>,
  pub page_info: PageInfo,
  /// Issue counts per status across the whole filtered set, not just this
  /// page. Optimistic edits leave these alone; the next authoritative
  /// fetch corrects them.
  pub status_counts: BTreeMap<IssueStatus, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
  pub total: u64,
  pub page: u32,
  pub pages: u32,
  pub limit: u32,
}

/// Aggregate dashboard summary. Cached whole and never patched in place:
/// issue mutations mark it stale so the next read refetches.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
  pub total_issues: u64,
  pub by_status: BTreeMap<IssueStatus, u64>,
  pub by_priority: BTreeMap<IssuePriority, u64>,
  pub by_severity: BTreeMap<IssueSeverity, u64>,
  pub recent_activity: Vec<Issue>,
}

// ============================================================================
// Request parameters
// ============================================================================

/// Payload for creating a new issue. Unset fields take server defaults
/// (Open / Medium / Minor); the coordinator fills the same defaults into
/// its optimistic placeholder so the two agree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueDraft {
  pub title: String,
  pub description: String,
  pub status: Option<IssueStatus>,
  pub priority: Option<IssuePriority>,
  pub severity: Option<IssueSeverity>,
  pub assigned_to: Option<User>,
  pub found_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc,
}

impl SortOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Asc => "asc",
      Self::Desc => "desc",
    }
  }
}

/// Parameters for a filtered issue listing.
///
/// Two filters that normalize identically (see `cache::keys`) address the
/// same cache entry, so construction order of the fields never matters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueFilter {
  pub status: Option<IssueStatus>,
  pub priority: Option<IssuePriority>,
  pub severity: Option<IssueSeverity>,
  /// Free-text search over title and description.
  pub search: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
}

impl IssueFilter {
  pub fn status(mut self, status: IssueStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn priority(mut self, priority: IssuePriority) -> Self {
    self.priority = Some(priority);
    self
  }

  pub fn severity(mut self, severity: IssueSeverity) -> Self {
    self.severity = Some(severity);
    self
  }

  pub fn search(mut self, search: impl Into<String>) -> Self {
    self.search = Some(search.into());
    self
  }

  pub fn page(mut self, page: u32) -> Self {
    self.page = Some(page);
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn sort(mut self, by: impl Into<String>, order: SortOrder) -> Self {
    self.sort_by = Some(by.into());
    self.sort_order = Some(order);
    self
  }
}

/// Server acknowledgement of a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteReceipt {
  pub message: String,
}
