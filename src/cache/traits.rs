//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, TransportFailure};
use crate::support::types::{EntityId, Message, Ticket};

/// Trait for entities that live in cached collections.
///
/// Implementors provide the id used to upsert them into a list.
pub trait Cacheable: Clone {
  fn cache_id(&self) -> &EntityId;
}

impl Cacheable for Ticket {
  fn cache_id(&self) -> &EntityId {
    &self.id
  }
}

impl Cacheable for Message {
  fn cache_id(&self) -> &EntityId {
    &self.id
  }
}

/// Insert or replace `item` in `list` by id. New items go to the front
/// unless `append` is set.
pub fn upsert<T: Cacheable>(list: &mut Vec<T>, item: T, append: bool) {
  if let Some(existing) = list.iter_mut().find(|e| e.cache_id() == item.cache_id()) {
    *existing = item;
  } else if append {
    list.push(item);
  } else {
    list.insert(0, item);
  }
}

/// Where a value handed to the UI came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
  /// Freshly confirmed by the server
  Live,
  /// Served from the local cache
  Cache,
  /// Nothing was available; the value is a synthesized placeholder
  EmptyFallback,
}

impl Provenance {
  pub fn as_str(&self) -> &'static str {
    match self {
      Provenance::Live => "live",
      Provenance::Cache => "cache",
      Provenance::EmptyFallback => "empty-fallback",
    }
  }
}

/// Result of a read, including data and metadata about the source.
///
/// Always renderable: a failed read still produces one of these, carrying
/// the failure that forced the fallback.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub provenance: Provenance,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Why the live read did not succeed
  pub failure: Option<TransportFailure>,
}

impl<T> Resolved<T> {
  /// Fresh data from the network.
  pub fn live(data: T) -> Self {
    Self {
      data,
      provenance: Provenance::Live,
      cached_at: None,
      failure: None,
    }
  }

  /// Data from the local cache after the live read failed.
  pub fn cached(data: T, cached_at: DateTime<Utc>, failure: Option<TransportFailure>) -> Self {
    Self {
      data,
      provenance: Provenance::Cache,
      cached_at: Some(cached_at),
      failure,
    }
  }

  /// A synthesized placeholder.
  pub fn empty(data: T, failure: Option<TransportFailure>) -> Self {
    Self {
      data,
      provenance: Provenance::EmptyFallback,
      cached_at: None,
      failure,
    }
  }

  pub fn is_live(&self) -> bool {
    self.provenance == Provenance::Live
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
    Resolved {
      data: f(self.data),
      provenance: self.provenance,
      cached_at: self.cached_at,
      failure: self.failure,
    }
  }
}

/// Keys of the records kept in the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheKey {
  /// The ticket list
  TicketList,
  /// Detail of a single ticket
  Ticket(EntityId),
  /// Message thread of a ticket
  Messages(EntityId),
}

impl CacheKey {
  /// Key under which the record is persisted.
  pub fn storage_key(&self) -> String {
    match self {
      Self::TicketList => "tickets".to_string(),
      Self::Ticket(id) => format!("ticket:{}", id),
      Self::Messages(id) => format!("messages:{}", id),
    }
  }

  /// Name of the entry kind this key holds.
  pub fn expected_kind(&self) -> &'static str {
    match self {
      Self::TicketList => CacheEntry::TICKET_LIST,
      Self::Ticket(_) => CacheEntry::TICKET,
      Self::Messages(_) => CacheEntry::MESSAGE_LIST,
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::TicketList => "ticket list".to_string(),
      Self::Ticket(id) => format!("ticket {}", id),
      Self::Messages(id) => format!("messages of ticket {}", id),
    }
  }
}

/// A cached value, tagged by shape so a record of the wrong shape is caught
/// as a typed error instead of being misread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CacheEntry {
  Ticket(Ticket),
  TicketList(Vec<Ticket>),
  MessageList(Vec<Message>),
}

impl CacheEntry {
  pub const TICKET: &'static str = "ticket";
  pub const TICKET_LIST: &'static str = "ticket_list";
  pub const MESSAGE_LIST: &'static str = "message_list";

  pub fn kind(&self) -> &'static str {
    match self {
      Self::Ticket(_) => Self::TICKET,
      Self::TicketList(_) => Self::TICKET_LIST,
      Self::MessageList(_) => Self::MESSAGE_LIST,
    }
  }
}

/// A stored cache entry with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
  pub entry: CacheEntry,
  pub provenance: Provenance,
  pub cached_at: DateTime<Utc>,
}

/// A typed value read from the cache.
#[derive(Debug, Clone)]
pub struct Cached<T> {
  pub value: T,
  pub provenance: Provenance,
  pub cached_at: DateTime<Utc>,
}

impl CacheRecord {
  fn wrong_kind(&self, key: &CacheKey, expected: &'static str) -> StoreError {
    StoreError::WrongKind {
      key: key.storage_key(),
      expected,
      found: self.entry.kind(),
    }
  }

  pub fn into_ticket(self, key: &CacheKey) -> Result<Cached<Ticket>, StoreError> {
    match self.entry {
      CacheEntry::Ticket(value) => Ok(Cached {
        value,
        provenance: self.provenance,
        cached_at: self.cached_at,
      }),
      _ => Err(self.wrong_kind(key, CacheEntry::TICKET)),
    }
  }

  pub fn into_ticket_list(self, key: &CacheKey) -> Result<Cached<Vec<Ticket>>, StoreError> {
    match self.entry {
      CacheEntry::TicketList(value) => Ok(Cached {
        value,
        provenance: self.provenance,
        cached_at: self.cached_at,
      }),
      _ => Err(self.wrong_kind(key, CacheEntry::TICKET_LIST)),
    }
  }

  pub fn into_messages(self, key: &CacheKey) -> Result<Cached<Vec<Message>>, StoreError> {
    match self.entry {
      CacheEntry::MessageList(value) => Ok(Cached {
        value,
        provenance: self.provenance,
        cached_at: self.cached_at,
      }),
      _ => Err(self.wrong_kind(key, CacheEntry::MESSAGE_LIST)),
    }
  }
}
