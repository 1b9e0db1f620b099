//! Query keys and resource tags.
//!
//! A query key is the normalized identity of one cached query. Filters
//! that normalize identically produce equal keys and therefore share a
//! cache entry, regardless of how they were constructed.

use crate::types::{IssueFilter, IssuePriority, IssueSeverity, IssueStatus, SortOrder};

/// Page number used when a filter leaves it unset.
pub const DEFAULT_PAGE: u32 = 1;
/// Page size used when a filter leaves it unset.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

// ============================================================================
// Resource kinds and tags
// ============================================================================

/// Kind of resource a cache entry is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
  Issue,
  Dashboard,
}

/// Tag attached to a cache entry at write time.
///
/// A bare kind tag marks an entry as derived from that resource kind as a
/// whole (listings, dashboard). An entity tag additionally names the
/// specific item the entry contains.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
  pub kind: ResourceKind,
  pub id: Option<String>,
}

impl Tag {
  /// Kind-wide tag, e.g. "derived from issues".
  pub fn kind(kind: ResourceKind) -> Self {
    Self { kind, id: None }
  }

  /// Entity-scoped tag, e.g. "contains issue srv-42".
  pub fn entity(kind: ResourceKind, id: impl Into<String>) -> Self {
    Self {
      kind,
      id: Some(id.into()),
    }
  }
}

// ============================================================================
// Query keys
// ============================================================================

/// Identity of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
  /// A filtered issue listing.
  IssueList(ListKey),
  /// A single issue by id.
  IssueDetail(String),
  /// The dashboard summary (one entry for the whole store).
  Dashboard,
}

impl QueryKey {
  pub fn issue_list(filter: &IssueFilter) -> Self {
    Self::IssueList(ListKey::from_filter(filter))
  }

  pub fn issue_detail(id: impl Into<String>) -> Self {
    Self::IssueDetail(id.into())
  }

  /// Resource kind this key belongs to.
  pub fn kind(&self) -> ResourceKind {
    match self {
      Self::IssueList(_) | Self::IssueDetail(_) => ResourceKind::Issue,
      Self::Dashboard => ResourceKind::Dashboard,
    }
  }

  /// Human-readable form for logging.
  pub fn description(&self) -> String {
    match self {
      Self::IssueList(key) => format!("issues page {} (limit {})", key.page, key.limit),
      Self::IssueDetail(id) => format!("issue {}", id),
      Self::Dashboard => "dashboard".to_string(),
    }
  }
}

/// Normalized form of an `IssueFilter`.
///
/// Normalization trims and lowercases the search text (dropping it when
/// empty) and fills page and limit defaults. Sort fields pass through
/// unchanged: the server treats them case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
  pub status: Option<IssueStatus>,
  pub priority: Option<IssuePriority>,
  pub severity: Option<IssueSeverity>,
  pub search: Option<String>,
  pub page: u32,
  pub limit: u32,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
}

impl ListKey {
  pub fn from_filter(filter: &IssueFilter) -> Self {
    Self {
      status: filter.status,
      priority: filter.priority,
      severity: filter.severity,
      search: filter
        .search
        .as_deref()
        .map(normalize_search)
        .filter(|s| !s.is_empty()),
      page: filter.page.unwrap_or(DEFAULT_PAGE),
      limit: filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
      sort_by: filter.sort_by.clone(),
      sort_order: filter.sort_order,
    }
  }
}

/// Normalize search text for key identity.
/// Trims whitespace and lowercases for case-insensitive matching.
fn normalize_search(search: &str) -> String {
  search.trim().to_lowercase()
}
