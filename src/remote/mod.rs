//! Remote tracker boundary.
//!
//! One logical request/response exchange per resource operation. The
//! `Remote` trait is the seam: `HttpRemote` talks to the real tracker
//! API, `InMemoryRemote` serves the same contract in process for tests
//! and offline development.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::mutation::IssuePatch;
use crate::types::{DashboardSnapshot, DeleteReceipt, Issue, IssueDraft, IssueFilter, IssuePage};

pub mod api_types;
mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{CallCounts, InMemoryRemote};

/// The tracker's resource operations.
///
/// Every method is one network round trip. Failures are uniform: the
/// caller treats transport, validation and not-found errors the same
/// way, differing only in the message it surfaces.
#[async_trait]
pub trait Remote: Send + Sync {
  /// Fetch one page of a filtered issue listing.
  async fn list_issues(&self, filter: &IssueFilter) -> Result<IssuePage, RemoteError>;

  /// Fetch a single issue by id.
  async fn get_issue(&self, id: &str) -> Result<Issue, RemoteError>;

  /// Create an issue. The server assigns the id and fills defaults for
  /// fields the draft leaves unset.
  async fn create_issue(&self, draft: &IssueDraft) -> Result<Issue, RemoteError>;

  /// Apply a partial update and return the authoritative entity, which
  /// may carry server-computed fields such as a resolution timestamp.
  async fn update_issue(&self, id: &str, patch: &IssuePatch) -> Result<Issue, RemoteError>;

  /// Delete an issue.
  async fn delete_issue(&self, id: &str) -> Result<DeleteReceipt, RemoteError>;

  /// Fetch the aggregate dashboard summary.
  async fn get_dashboard(&self) -> Result<DashboardSnapshot, RemoteError>;
}
