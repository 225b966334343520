//! Request builders for the support API and the HTTP transport that
//! classifies each outcome as client, server or no-response.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{SupportError, TransportFailure};

use super::api_types::{ApiErrorBody, Assignment, NewMessage, NewTicket, StatusChange};
use super::types::TicketFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

/// A single call against the support API, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Post,
      path: path.into(),
      query: Vec::new(),
      body: Some(body),
    }
  }

  pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
    self.query.push((key.to_string(), value.into()));
    self
  }

  /// All tickets (administrators) or the caller's own tickets. Only the
  /// status narrows the caller's own list.
  pub fn ticket_list(filter: &TicketFilter, all: bool) -> Self {
    let mut request = if all {
      Self::get("tickets/")
    } else {
      Self::get("tickets/my_tickets/")
    };
    if let Some(status) = filter.status {
      request = request.with_query("status", status.as_str());
    }
    if !all {
      return request;
    }
    if let Some(priority) = filter.priority {
      request = request.with_query("priority", priority.as_str());
    }
    if let Some(employee) = filter.employee {
      request = request.with_query("employee_id", employee.to_string());
    }
    if let Some(search) = &filter.search {
      request = request.with_query("search", search.trim());
    }
    request
  }

  pub fn ticket_detail(id: u64) -> Self {
    Self::get(format!("tickets/{}/", id))
  }

  pub fn create_ticket(ticket: &NewTicket) -> Self {
    Self::post("tickets/", ticket.body())
  }

  pub fn messages(ticket: u64) -> Self {
    Self::get("messages/").with_query("ticket_id", ticket.to_string())
  }

  pub fn send_message(message: &NewMessage) -> Self {
    Self::post("messages/", message.body())
  }

  pub fn change_status(ticket: u64, change: StatusChange) -> Self {
    Self::post(
      format!("tickets/{}/change_status/", ticket),
      serde_json::json!({ "status": change.status }),
    )
  }

  pub fn assign(ticket: u64, assignment: Assignment) -> Self {
    Self::post(
      format!("tickets/{}/assign/", ticket),
      serde_json::json!({ "admin_id": assignment.admin_id }),
    )
  }

  pub fn ticket_stats() -> Self {
    Self::get("tickets/stats/")
  }
}

/// Performs one network call and classifies its outcome.
///
/// Implementations never retry; see [`super::retry::with_retry`].
#[async_trait]
pub trait Transport: Send + Sync {
  async fn call(&self, request: &ApiRequest, credential: &str) -> Result<Value, TransportFailure>;
}

/// Classify an HTTP status and body.
pub fn classify(status: u16, body: &str) -> Result<(), TransportFailure> {
  let reason = || ApiErrorBody::reason(body).unwrap_or_else(|| body.to_string());
  match status {
    200..=299 => Ok(()),
    400..=499 => Err(TransportFailure::Client {
      status,
      body: reason(),
    }),
    _ => Err(TransportFailure::Server {
      status,
      body: reason(),
    }),
  }
}

/// Support API client over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SupportError> {
    // Url::join drops the last path segment unless the base ends with a slash
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| SupportError::Config(format!("invalid server url '{}': {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SupportError::Config(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn call(&self, request: &ApiRequest, credential: &str) -> Result<Value, TransportFailure> {
    let url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| TransportFailure::no_response(format!("bad path {}: {}", request.path, e)))?;

    let mut builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
    };
    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }
    let auth = HeaderValue::from_str(&format!("Token {}", credential))
      .map_err(|e| TransportFailure::no_response(format!("invalid credential: {}", e)))?;
    builder = builder
      .header(AUTHORIZATION, auth)
      .header(ACCEPT, "application/json");

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        TransportFailure::no_response("request timed out")
      } else {
        TransportFailure::no_response(e.to_string())
      }
    })?;

    let status = response.status().as_u16();
    let body = response
      .text()
      .await
      .map_err(|e| TransportFailure::no_response(format!("failed to read response body: {}", e)))?;
    debug!(status, path = %request.path, "support api response");

    classify(status, &body)?;

    if body.trim().is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_str(&body)
      .map_err(|e| TransportFailure::no_response(format!("undecodable response body: {}", e)))
  }
}
