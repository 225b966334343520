//! Error types for the support client core.

use std::path::PathBuf;

use crate::support::types::EntityId;

/// Classified outcome of a failed transport call.
///
/// Client errors (4xx) are permanent and never retried automatically.
/// Server errors (5xx) and calls that produced no usable response are
/// transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
  #[error("request rejected with status {status}: {body}")]
  Client { status: u16, body: String },

  #[error("server error with status {status}: {body}")]
  Server { status: u16, body: String },

  #[error("no response: {reason}")]
  NoResponse { reason: String },
}

impl TransportFailure {
  pub fn no_response(reason: impl Into<String>) -> Self {
    Self::NoResponse {
      reason: reason.into(),
    }
  }

  /// Whether the failure is worth retrying automatically.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, Self::Client { .. })
  }

  /// HTTP status, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
      Self::NoResponse { .. } => None,
    }
  }

  /// Message suitable for showing to the person using the client.
  pub fn user_message(&self) -> String {
    match self {
      Self::Client { status: 401, .. } => {
        "Your session has expired. Please sign in again.".to_string()
      }
      Self::Client { status: 403, .. } => {
        "You do not have access to this support ticket. Only tickets you created are visible."
          .to_string()
      }
      Self::Client { status: 404, .. } => {
        "The requested ticket was not found. It may have been deleted or moved.".to_string()
      }
      Self::Client { status, .. } => {
        format!("The request was rejected (code {}). Please try again later.", status)
      }
      Self::Server { .. } => "The server is having trouble. Showing saved data; messages you send \
                              are kept and delivered once it recovers."
        .to_string(),
      Self::NoResponse { .. } => "Cannot reach the server. Check your connection; messages you \
                                  send are kept and delivered once it is restored."
        .to_string(),
    }
  }
}

/// Failures of the persistent key-value store and the records kept in it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("store database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("store lock poisoned")]
  Poisoned,

  #[error("could not determine data directory")]
  NoDataDir,

  #[error("failed to create store directory {}: {source}", path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("failed to encode record {key}: {source}")]
  Encode {
    key: String,
    source: serde_json::Error,
  },

  #[error("corrupt record at {key}: {source}")]
  Corrupt {
    key: String,
    source: serde_json::Error,
  },

  #[error("record at {key} holds a {found}, expected a {expected}")]
  WrongKind {
    key: String,
    expected: &'static str,
    found: &'static str,
  },
}

/// Errors surfaced to callers of the support service.
///
/// Read paths only ever return [`SupportError::Unauthorized`]; everything else
/// is degraded into a fallback value.
#[derive(Debug, thiserror::Error)]
pub enum SupportError {
  #[error("not authorized to view ticket {ticket}")]
  Unauthorized { ticket: EntityId },

  #[error("only administrators may {action}")]
  Forbidden { action: &'static str },

  #[error("invalid input: {0}")]
  Validation(String),

  #[error("no outbox entry with id {0}")]
  UnknownEntry(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Transport(#[from] TransportFailure),
}
