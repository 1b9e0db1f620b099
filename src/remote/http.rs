//! HTTP implementation of the remote boundary.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::RemoteError;
use crate::mutation::IssuePatch;
use crate::types::{DashboardSnapshot, DeleteReceipt, Issue, IssueDraft, IssueFilter, IssuePage};

use super::api_types::{
  update_body, ApiDashboardResponse, ApiDeleteResponse, ApiErrorBody, ApiIssue, ApiIssueDraft,
  ApiIssuesResponse,
};
use super::Remote;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote client against the tracker's REST API.
#[derive(Clone)]
pub struct HttpRemote {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl HttpRemote {
  /// Build a client for the API at `base_url`, authenticating with a
  /// bearer token. Request timeouts surface as transport failures.
  pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid tracker URL {}: {}", base_url, e))?;
    // Url::join drops the last path segment without this.
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: token.into(),
    })
  }

  /// Build a client from the loaded configuration, reading the API
  /// token from the environment.
  pub fn from_config(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::new(&config.tracker.url, token)
  }

  fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base
      .join(path)
      .map_err(|e| RemoteError::Transport(format!("invalid endpoint {}: {}", path, e)))
  }

  fn issues_endpoint(&self, filter: &IssueFilter) -> Result<Url, RemoteError> {
    let mut url = self.endpoint("issues")?;
    {
      let mut query = url.query_pairs_mut();
      if let Some(status) = filter.status {
        query.append_pair("status", status.as_str());
      }
      if let Some(priority) = filter.priority {
        query.append_pair("priority", priority.as_str());
      }
      if let Some(severity) = filter.severity {
        query.append_pair("severity", severity.as_str());
      }
      if let Some(search) = filter.search.as_deref() {
        query.append_pair("search", search);
      }
      if let Some(page) = filter.page {
        query.append_pair("page", &page.to_string());
      }
      if let Some(limit) = filter.limit {
        query.append_pair("limit", &limit.to_string());
      }
      if let Some(sort_by) = filter.sort_by.as_deref() {
        query.append_pair("sortBy", sort_by);
      }
      if let Some(order) = filter.sort_order {
        query.append_pair("sortOrder", order.as_str());
      }
    }
    Ok(url)
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
    request
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|e| RemoteError::Transport(e.to_string()))
  }

  /// Map the response onto the error taxonomy: 404 is not-found, any
  /// other non-success is an API error carrying the server's `msg` body
  /// when one is present, and an unreadable success body is a decode
  /// failure.
  async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
      let message = response
        .json::<ApiErrorBody>()
        .await
        .ok()
        .and_then(|body| body.msg)
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
      return Err(if status == StatusCode::NOT_FOUND {
        RemoteError::NotFound(message)
      } else {
        RemoteError::Api {
          status: status.as_u16(),
          message,
        }
      });
    }
    response
      .json::<T>()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))
  }
}

#[async_trait]
impl Remote for HttpRemote {
  async fn list_issues(&self, filter: &IssueFilter) -> Result<IssuePage, RemoteError> {
    let url = self.issues_endpoint(filter)?;
    let response = self.send(self.http.get(url)).await?;
    let payload: ApiIssuesResponse = Self::decode(response).await?;
    Ok(payload.into())
  }

  async fn get_issue(&self, id: &str) -> Result<Issue, RemoteError> {
    let url = self.endpoint(&format!("issues/{}", id))?;
    let response = self.send(self.http.get(url)).await?;
    let payload: ApiIssue = Self::decode(response).await?;
    Ok(payload.into())
  }

  async fn create_issue(&self, draft: &IssueDraft) -> Result<Issue, RemoteError> {
    let url = self.endpoint("issues")?;
    let body = ApiIssueDraft::from(draft);
    let response = self.send(self.http.post(url).json(&body)).await?;
    let payload: ApiIssue = Self::decode(response).await?;
    Ok(payload.into())
  }

  async fn update_issue(&self, id: &str, patch: &IssuePatch) -> Result<Issue, RemoteError> {
    let url = self.endpoint(&format!("issues/{}", id))?;
    let response = self
      .send(self.http.put(url).json(&update_body(patch)))
      .await?;
    let payload: ApiIssue = Self::decode(response).await?;
    Ok(payload.into())
  }

  async fn delete_issue(&self, id: &str) -> Result<DeleteReceipt, RemoteError> {
    let url = self.endpoint(&format!("issues/{}", id))?;
    let response = self.send(self.http.delete(url)).await?;
    let payload: ApiDeleteResponse = Self::decode(response).await?;
    Ok(payload.into())
  }

  async fn get_dashboard(&self) -> Result<DashboardSnapshot, RemoteError> {
    let url = self.endpoint("dashboard")?;
    let response = self.send(self.http.get(url)).await?;
    let payload: ApiDashboardResponse = Self::decode(response).await?;
    Ok(payload.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{IssueStatus, SortOrder};

  #[test]
  fn test_base_url_keeps_trailing_path() {
    let remote = HttpRemote::new("https://tracker.example.com/api", "t").unwrap();
    let url = remote.endpoint("issues").unwrap();
    assert_eq!(url.as_str(), "https://tracker.example.com/api/issues");
  }

  #[test]
  fn test_filter_becomes_query_params() {
    let remote = HttpRemote::new("https://tracker.example.com/api", "t").unwrap();
    let filter = IssueFilter::default()
      .status(IssueStatus::InProgress)
      .search("login")
      .page(2)
      .sort("createdAt", SortOrder::Desc);

    let url = remote.issues_endpoint(&filter).unwrap();
    let query = url.query().unwrap();
    assert!(query.contains("status=In+Progress"));
    assert!(query.contains("search=login"));
    assert!(query.contains("page=2"));
    assert!(query.contains("sortBy=createdAt"));
    assert!(query.contains("sortOrder=desc"));
    assert!(!query.contains("limit="));
  }
}
