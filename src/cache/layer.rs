//! Ticket and message cache over the key-value store.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::support::types::{EntityId, Message, Ticket};

use super::storage::KvStore;
use super::traits::{upsert, CacheEntry, CacheKey, CacheRecord, Cached, Provenance};

/// Write-behind cache of the ticket list, ticket details and message threads.
///
/// Every mutation is persisted to the store before it returns. Read-modify-
/// write operations hold an internal lock so concurrent callers never lose
/// each other's updates.
#[derive(Clone)]
pub struct TicketCache {
  store: Arc<dyn KvStore>,
  write_lock: Arc<Mutex<()>>,
}

impl TicketCache {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    Self {
      store,
      write_lock: Arc::new(Mutex::new(())),
    }
  }

  /// Overwrite the record under `key`.
  pub fn put(
    &self,
    key: &CacheKey,
    entry: CacheEntry,
    provenance: Provenance,
  ) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
    self.write(key, entry, provenance)
  }

  /// Read the record under `key`.
  pub fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StoreError> {
    let storage_key = key.storage_key();
    let Some(value) = self.store.get(&storage_key)? else {
      return Ok(None);
    };
    serde_json::from_value(value)
      .map(Some)
      .map_err(|source| StoreError::Corrupt {
        key: storage_key,
        source,
      })
  }

  /// Forget the record under `key`.
  pub fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
    self.store.remove(&key.storage_key())?;
    debug!(key = %key.storage_key(), "cache record removed");
    Ok(())
  }

  pub fn get_ticket(&self, id: &EntityId) -> Result<Option<Cached<Ticket>>, StoreError> {
    let key = CacheKey::Ticket(id.clone());
    self.get(&key)?.map(|r| r.into_ticket(&key)).transpose()
  }

  pub fn get_ticket_list(&self) -> Result<Option<Cached<Vec<Ticket>>>, StoreError> {
    let key = CacheKey::TicketList;
    self.get(&key)?.map(|r| r.into_ticket_list(&key)).transpose()
  }

  pub fn get_messages(&self, ticket: &EntityId) -> Result<Option<Cached<Vec<Message>>>, StoreError> {
    let key = CacheKey::Messages(ticket.clone());
    self.get(&key)?.map(|r| r.into_messages(&key)).transpose()
  }

  /// Insert a freshly created ticket at the head of the cached list.
  pub fn append_to_list(&self, ticket: Ticket) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
    let (mut list, provenance) = self.list_for_update();
    list.retain(|t| t.id != ticket.id);
    list.insert(0, ticket);
    self.write(&CacheKey::TicketList, CacheEntry::TicketList(list), provenance)
  }

  /// Upsert tickets into the cached list by id, keeping unrelated entries.
  pub fn merge_into_list(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
    let (mut list, _) = self.list_for_update();
    for ticket in tickets.iter().rev() {
      upsert(&mut list, ticket.summary(), false);
    }
    self.write(
      &CacheKey::TicketList,
      CacheEntry::TicketList(list),
      Provenance::Live,
    )
  }

  /// Swap the entry with `old_id` for `ticket`, dropping any other copy of
  /// `ticket`'s id.
  pub fn replace_in_list(&self, old_id: &EntityId, ticket: &Ticket) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
    let (list, provenance) = self.list_for_update();
    let summary = ticket.summary();

    let mut replaced = false;
    let mut updated = Vec::with_capacity(list.len() + 1);
    for existing in list {
      if existing.id == *old_id {
        if !replaced {
          updated.push(summary.clone());
          replaced = true;
        }
      } else if existing.id != ticket.id {
        updated.push(existing);
      }
    }
    if !replaced {
      updated.insert(0, summary);
    }

    self.write(&CacheKey::TicketList, CacheEntry::TicketList(updated), provenance)
  }

  /// Upsert a confirmed message into its ticket's cached thread.
  pub fn append_message(&self, message: &Message) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
    let key = CacheKey::Messages(message.ticket.clone());
    let (mut thread, provenance) = match self.get_messages(&message.ticket) {
      Ok(Some(cached)) => (cached.value, cached.provenance),
      Ok(None) => (Vec::new(), Provenance::Cache),
      Err(e) => {
        warn!(error = %e, key = %key.storage_key(), "discarding unreadable thread");
        (Vec::new(), Provenance::Cache)
      }
    };
    upsert(&mut thread, message.clone(), true);
    self.write(&key, CacheEntry::MessageList(thread), provenance)
  }

  /// Scan the cached list for a ticket.
  pub fn find_in_list(&self, id: &EntityId) -> Result<Option<Cached<Ticket>>, StoreError> {
    Ok(self.get_ticket_list()?.and_then(|cached| {
      let provenance = cached.provenance;
      let cached_at = cached.cached_at;
      cached
        .value
        .into_iter()
        .find(|t| t.id == *id)
        .map(|value| Cached {
          value,
          provenance,
          cached_at,
        })
    }))
  }

  /// Current list for a read-modify-write. Unreadable records are replaced.
  fn list_for_update(&self) -> (Vec<Ticket>, Provenance) {
    match self.get_ticket_list() {
      Ok(Some(cached)) => (cached.value, cached.provenance),
      Ok(None) => (Vec::new(), Provenance::Cache),
      Err(e) => {
        warn!(error = %e, "discarding unreadable ticket list");
        (Vec::new(), Provenance::Cache)
      }
    }
  }

  fn write(
    &self,
    key: &CacheKey,
    entry: CacheEntry,
    provenance: Provenance,
  ) -> Result<(), StoreError> {
    let storage_key = key.storage_key();
    if entry.kind() != key.expected_kind() {
      return Err(StoreError::WrongKind {
        key: storage_key,
        expected: key.expected_kind(),
        found: entry.kind(),
      });
    }

    let record = CacheRecord {
      entry,
      provenance,
      cached_at: Utc::now(),
    };
    let value = serde_json::to_value(&record).map_err(|source| StoreError::Encode {
      key: storage_key.clone(),
      source,
    })?;
    self.store.set(&storage_key, &value)?;
    debug!(key = %storage_key, provenance = provenance.as_str(), "cache updated");
    Ok(())
  }
}
