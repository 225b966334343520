//! Request payloads for the support API and helpers for decoding responses.
//!
//! The payload types double as the outbox record of a pending write, so they
//! carry the client-side submission time alongside the fields the server
//! accepts.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TransportFailure;

use super::types::{EntityId, Priority, TicketStatus};

/// Body of `POST tickets/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
  pub title: String,
  pub description: String,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub employee: Option<u64>,
  pub created_at: DateTime<Utc>,
}

impl NewTicket {
  pub fn body(&self) -> Value {
    json!({
      "title": self.title,
      "description": self.description,
      "priority": self.priority,
      "category": self.category,
      "employee": self.employee,
    })
  }
}

/// Body of `POST messages/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
  pub ticket: EntityId,
  pub content: String,
  pub sender: u64,
  pub created_at: DateTime<Utc>,
}

impl NewMessage {
  pub fn body(&self) -> Value {
    json!({
      "ticket": self.ticket,
      "content": self.content,
      "sender": self.sender,
    })
  }
}

/// Body of `POST tickets/<id>/change_status/`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusChange {
  pub status: TicketStatus,
}

/// Body of `POST tickets/<id>/assign/`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Assignment {
  pub admin_id: u64,
}

/// Error body returned by the support server (`detail` from the framework,
/// `error` from custom actions).
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub detail: Option<String>,
  pub error: Option<String>,
}

impl ApiErrorBody {
  /// Extract a human readable reason from a raw error body.
  pub fn reason(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
      .ok()
      .and_then(|b| b.detail.or(b.error))
  }
}

/// Decode a successful response body into a domain type.
///
/// A body that does not match the expected shape is treated like a missing
/// response: the server did not give us anything we can use.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, TransportFailure> {
  serde_json::from_value(value)
    .map_err(|e| TransportFailure::no_response(format!("undecodable response body: {}", e)))
}

/// Decode a list response, accepting both a bare array and a paginated
/// `{"results": [...]}` page.
pub fn decode_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, TransportFailure> {
  match value {
    Value::Object(mut page) if page.contains_key("results") => {
      decode(page.remove("results").unwrap_or_default())
    }
    Value::Null => Ok(Vec::new()),
    other => decode(other),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::support::types::Ticket;

  #[test]
  fn test_message_body_omits_client_fields() {
    let msg = NewMessage {
      ticket: EntityId::Server(5),
      content: "still broken".to_string(),
      sender: 9,
      created_at: Utc::now(),
    };
    let body = msg.body();
    assert_eq!(body["ticket"], 5);
    assert_eq!(body["sender"], 9);
    assert!(body.get("created_at").is_none());
  }

  #[test]
  fn test_error_reason() {
    assert_eq!(
      ApiErrorBody::reason(r#"{"detail": "Not found."}"#).as_deref(),
      Some("Not found.")
    );
    assert_eq!(
      ApiErrorBody::reason(r#"{"error": "Invalid status"}"#).as_deref(),
      Some("Invalid status")
    );
    assert_eq!(ApiErrorBody::reason("<html>"), None);
  }

  #[test]
  fn test_decode_mismatch_is_no_response() {
    let result: Result<Ticket, _> = decode(json!({"unexpected": true}));
    assert!(matches!(result, Err(TransportFailure::NoResponse { .. })));
  }

  #[test]
  fn test_decode_list_accepts_pages() {
    let bare: Vec<u64> = decode_list(json!([1, 2])).unwrap();
    let paged: Vec<u64> = decode_list(json!({"count": 2, "results": [1, 2]})).unwrap();
    assert_eq!(bare, paged);
    assert!(decode_list::<u64>(Value::Null).unwrap().is_empty());
  }
}
