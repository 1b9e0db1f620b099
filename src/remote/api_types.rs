//! Serde types matching the tracker's JSON wire format.
//!
//! The API speaks camelCase JSON with Mongo-style `_id` fields. These
//! types stay separate from the domain types in `crate::types`, which
//! carry none of the wire quirks.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::mutation::{Field, IssuePatch};
use crate::types::{
  DashboardSnapshot, DeleteReceipt, Issue, IssueDraft, IssuePage, IssuePriority, IssueSeverity,
  IssueStatus, PageInfo, User,
};

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
  #[serde(rename = "_id")]
  pub id: String,
  pub name: String,
  pub email: String,
}

impl From<ApiUser> for User {
  fn from(user: ApiUser) -> Self {
    Self {
      id: user.id,
      name: user.name,
      email: user.email,
    }
  }
}

impl From<&User> for ApiUser {
  fn from(user: &User) -> Self {
    Self {
      id: user.id.clone(),
      name: user.name.clone(),
      email: user.email.clone(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIssue {
  #[serde(rename = "_id")]
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub status: IssueStatus,
  pub priority: IssuePriority,
  pub severity: IssueSeverity,
  pub created_by: ApiUser,
  #[serde(default)]
  pub assigned_to: Option<ApiUser>,
  #[serde(default)]
  pub resolved_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub found_date: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl From<ApiIssue> for Issue {
  fn from(issue: ApiIssue) -> Self {
    Self {
      id: issue.id,
      title: issue.title,
      description: issue.description,
      status: issue.status,
      priority: issue.priority,
      severity: issue.severity,
      created_by: issue.created_by.into(),
      assigned_to: issue.assigned_to.map(Into::into),
      resolved_at: issue.resolved_at,
      found_date: issue.found_date,
      created_at: issue.created_at,
      updated_at: issue.updated_at,
    }
  }
}

// ============================================================================
// Listing response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPagination {
  pub total: u64,
  pub page: u32,
  pub pages: u32,
  pub limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIssuesResponse {
  pub issues: Vec<ApiIssue>,
  pub pagination: ApiPagination,
  #[serde(default)]
  pub status_counts: HashMap<String, u64>,
}

impl From<ApiIssuesResponse> for IssuePage {
  fn from(response: ApiIssuesResponse) -> Self {
    Self {
      issues: response.issues.into_iter().map(Into::into).collect(),
      page_info: PageInfo {
        total: response.pagination.total,
        page: response.pagination.page,
        pages: response.pagination.pages,
        limit: response.pagination.limit,
      },
      status_counts: parse_counts(response.status_counts),
    }
  }
}

/// Convert a wire count map keyed by display names into a typed map.
/// Names the enum does not know are dropped.
fn parse_counts<K: Ord + DeserializeOwned>(raw: HashMap<String, u64>) -> BTreeMap<K, u64> {
  raw
    .into_iter()
    .filter_map(|(name, count)| {
      serde_json::from_value::<K>(Value::String(name))
        .ok()
        .map(|key| (key, count))
    })
    .collect()
}

// ============================================================================
// Dashboard response
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCharts {
  #[serde(default)]
  pub by_status: HashMap<String, u64>,
  #[serde(default)]
  pub by_priority: HashMap<String, u64>,
  #[serde(default)]
  pub by_severity: HashMap<String, u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDashboardResponse {
  #[serde(default)]
  pub charts: ApiCharts,
  #[serde(default)]
  pub recent_activity: Vec<ApiIssue>,
}

impl From<ApiDashboardResponse> for DashboardSnapshot {
  fn from(response: ApiDashboardResponse) -> Self {
    let by_status: BTreeMap<IssueStatus, u64> = parse_counts(response.charts.by_status);
    Self {
      total_issues: by_status.values().sum(),
      by_status,
      by_priority: parse_counts(response.charts.by_priority),
      by_severity: parse_counts(response.charts.by_severity),
      recent_activity: response.recent_activity.into_iter().map(Into::into).collect(),
    }
  }
}

// ============================================================================
// Mutation payloads and acknowledgements
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIssueDraft {
  pub title: String,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<IssueStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<IssuePriority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub severity: Option<IssueSeverity>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to: Option<ApiUser>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub found_date: Option<DateTime<Utc>>,
}

impl From<&IssueDraft> for ApiIssueDraft {
  fn from(draft: &IssueDraft) -> Self {
    Self {
      title: draft.title.clone(),
      description: draft.description.clone(),
      status: draft.status,
      priority: draft.priority,
      severity: draft.severity,
      assigned_to: draft.assigned_to.as_ref().map(Into::into),
      found_date: draft.found_date,
    }
  }
}

/// Serialize a partial update as the wire body: only the fields the
/// patch sets appear, so the server treats everything else as untouched.
pub fn update_body(patch: &IssuePatch) -> Value {
  let mut body = Map::new();
  set_field(&mut body, "title", &patch.title);
  set_field(&mut body, "description", &patch.description);
  set_field(&mut body, "status", &patch.status);
  set_field(&mut body, "priority", &patch.priority);
  set_field(&mut body, "severity", &patch.severity);
  if let Field::Set(assignee) = &patch.assigned_to {
    let value = match assignee {
      Some(user) => serde_json::to_value(ApiUser::from(user)).unwrap_or(Value::Null),
      None => Value::Null,
    };
    body.insert("assignedTo".to_string(), value);
  }
  if let Field::Set(found) = &patch.found_date {
    body.insert(
      "foundDate".to_string(),
      serde_json::to_value(found).unwrap_or(Value::Null),
    );
  }
  Value::Object(body)
}

fn set_field<T: Serialize>(body: &mut Map<String, Value>, name: &str, field: &Field<T>) {
  if let Field::Set(value) = field {
    if let Ok(value) = serde_json::to_value(value) {
      body.insert(name.to_string(), value);
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiDeleteResponse {
  pub msg: String,
}

impl From<ApiDeleteResponse> for DeleteReceipt {
  fn from(response: ApiDeleteResponse) -> Self {
    Self {
      message: response.msg,
    }
  }
}

/// Error body the tracker attaches to non-success responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub msg: Option<String>,
}
