//! Durable queue of writes that have not been confirmed by the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::KvStore;
use crate::error::{StoreError, TransportFailure};

use super::api_types::{NewMessage, NewTicket};
use super::types::EntityId;

const OUTBOX_KEY: &str = "outbox";

/// The write an entry is waiting to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxPayload {
  CreateTicket(NewTicket),
  SendMessage(NewMessage),
}

impl OutboxPayload {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::CreateTicket(_) => "create_ticket",
      Self::SendMessage(_) => "send_message",
    }
  }

  /// Stable identity of the submission, shared by accidental duplicates.
  pub fn fingerprint(&self) -> String {
    let input = match self {
      Self::CreateTicket(t) => format!(
        "create_ticket||{}|{}|{}",
        t.title,
        t.employee.map(|e| e.to_string()).unwrap_or_default(),
        t.created_at.to_rfc3339()
      ),
      Self::SendMessage(m) => format!(
        "send_message|{}|{}|{}|{}",
        m.ticket,
        m.content,
        m.sender,
        m.created_at.to_rfc3339()
      ),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  Pending,
  Sending,
  Failed,
}

impl EntryStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntryStatus::Pending => "pending",
      EntryStatus::Sending => "sending",
      EntryStatus::Failed => "failed",
    }
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
  pub local_id: String,
  pub payload: OutboxPayload,
  pub attempts: u32,
  pub status: EntryStatus,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub last_attempt_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub last_error: Option<String>,
  /// Cleared once the server rejects the payload itself
  #[serde(default = "default_true")]
  pub retryable: bool,
  /// A manual retry allows one more attempt past the cap
  #[serde(default)]
  pub retry_granted: bool,
  pub fingerprint: String,
}

impl OutboxEntry {
  /// Whether an automatic sweep may attempt this entry.
  pub fn is_eligible(&self, cap: u32) -> bool {
    self.retry_granted || (self.retryable && self.attempts < cap)
  }

  /// Out of automatic attempts; kept until someone retries it by hand.
  pub fn is_exhausted(&self, cap: u32) -> bool {
    self.attempts >= cap
  }

  /// Whether this entry creates or writes to the given ticket.
  pub fn targets(&self, ticket: &EntityId) -> bool {
    match &self.payload {
      OutboxPayload::CreateTicket(_) => matches!(ticket, EntityId::Local(id) if *id == self.local_id),
      OutboxPayload::SendMessage(m) => m.ticket == *ticket,
    }
  }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
  Sent,
  Failed(TransportFailure),
}

/// Ordered, persisted set of pending writes.
#[derive(Clone)]
pub struct Outbox {
  store: Arc<dyn KvStore>,
  entries: Arc<Mutex<Vec<OutboxEntry>>>,
  cap: u32,
}

impl Outbox {
  /// Load the outbox from the store. Entries left mid-send by a previous
  /// process are returned to pending.
  pub fn load(store: Arc<dyn KvStore>, cap: u32) -> Result<Self, StoreError> {
    let entries = match store.get(OUTBOX_KEY)? {
      Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Corrupt {
        key: OUTBOX_KEY.to_string(),
        source,
      })?,
      None => Vec::new(),
    };

    let outbox = Self {
      store,
      entries: Arc::new(Mutex::new(entries)),
      cap,
    };
    outbox.recover()?;
    Ok(outbox)
  }

  pub fn cap(&self) -> u32 {
    self.cap
  }

  /// Add a write. Submitting the same payload twice returns the existing id.
  pub fn enqueue(&self, payload: OutboxPayload) -> Result<String, StoreError> {
    self.enqueue_with(payload, |_| Ok(()))
  }

  /// Enqueue, running `on_new` with the minted id before the entry becomes
  /// visible to sweeps. Not called for a duplicate submission; if it fails
  /// nothing is queued.
  pub fn enqueue_with(
    &self,
    payload: OutboxPayload,
    on_new: impl FnOnce(&str) -> Result<(), StoreError>,
  ) -> Result<String, StoreError> {
    let fingerprint = payload.fingerprint();
    self.update(|entries| {
      if let Some(existing) = entries.iter().find(|e| e.fingerprint == fingerprint) {
        debug!(local_id = %existing.local_id, "duplicate submission, keeping existing entry");
        return Ok(existing.local_id.clone());
      }

      let local_id = EntityId::new_local().to_string();
      on_new(&local_id)?;
      debug!(local_id = %local_id, kind = payload.kind(), "enqueued write");
      entries.push(OutboxEntry {
        local_id: local_id.clone(),
        payload,
        attempts: 0,
        status: EntryStatus::Pending,
        created_at: Utc::now(),
        last_attempt_at: None,
        last_error: None,
        retryable: true,
        retry_granted: false,
        fingerprint,
      });
      Ok(local_id)
    })?
  }

  pub fn mark_sending(&self, local_id: &str) -> Result<(), StoreError> {
    self.update(|entries| {
      if let Some(entry) = entries.iter_mut().find(|e| e.local_id == local_id) {
        entry.status = EntryStatus::Sending;
        entry.last_attempt_at = Some(Utc::now());
      }
    })
  }

  /// Record the outcome of a delivery attempt. Success removes the entry;
  /// failure returns the updated entry.
  pub fn mark_attempt(
    &self,
    local_id: &str,
    outcome: AttemptOutcome,
  ) -> Result<Option<OutboxEntry>, StoreError> {
    self.update(|entries| {
      let Some(index) = entries.iter().position(|e| e.local_id == local_id) else {
        warn!(local_id, "attempt recorded for unknown outbox entry");
        return None;
      };

      match outcome {
        AttemptOutcome::Sent => {
          entries.remove(index);
          None
        }
        AttemptOutcome::Failed(failure) => {
          let entry = &mut entries[index];
          entry.attempts += 1;
          entry.status = EntryStatus::Failed;
          entry.last_attempt_at = Some(Utc::now());
          entry.retry_granted = false;
          if !failure.is_retryable() {
            entry.retryable = false;
          }
          entry.last_error = Some(failure.to_string());
          Some(entry.clone())
        }
      }
    })
  }

  /// All entries, oldest first.
  pub fn list_pending(&self) -> Vec<OutboxEntry> {
    self.entries().clone()
  }

  pub fn get(&self, local_id: &str) -> Option<OutboxEntry> {
    self.entries().iter().find(|e| e.local_id == local_id).cloned()
  }

  /// Entries that create or write to `ticket`.
  pub fn pending_for_ticket(&self, ticket: &EntityId) -> Vec<OutboxEntry> {
    self
      .entries()
      .iter()
      .filter(|e| e.targets(ticket))
      .cloned()
      .collect()
  }

  /// Make an entry eligible for one more attempt. Its attempt count is kept.
  pub fn grant_retry(&self, local_id: &str) -> Result<bool, StoreError> {
    self.update(|entries| match entries.iter_mut().find(|e| e.local_id == local_id) {
      Some(entry) => {
        entry.retry_granted = true;
        true
      }
      None => false,
    })
  }

  /// Grant a retry to every entry that is not currently eligible.
  pub fn grant_retry_all(&self) -> Result<usize, StoreError> {
    let cap = self.cap;
    self.update(|entries| {
      let mut granted = 0;
      for entry in entries.iter_mut().filter(|e| !e.is_eligible(cap)) {
        entry.retry_granted = true;
        granted += 1;
      }
      granted
    })
  }

  /// Point queued messages for a retired local ticket at its server id.
  pub fn retarget(&self, old: &EntityId, new: &EntityId) -> Result<usize, StoreError> {
    self.update(|entries| {
      let mut moved = 0;
      for entry in entries.iter_mut() {
        if let OutboxPayload::SendMessage(message) = &mut entry.payload {
          if message.ticket == *old {
            message.ticket = new.clone();
            moved += 1;
          }
        }
      }
      if moved > 0 {
        info!(from = %old, to = %new, moved, "retargeted queued messages");
      }
      moved
    })
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  fn recover(&self) -> Result<(), StoreError> {
    let interrupted = self
      .entries()
      .iter()
      .any(|e| e.status == EntryStatus::Sending);
    if !interrupted {
      return Ok(());
    }

    self.update(|entries| {
      for entry in entries.iter_mut().filter(|e| e.status == EntryStatus::Sending) {
        warn!(local_id = %entry.local_id, "recovering entry interrupted mid-send");
        entry.status = EntryStatus::Pending;
      }
    })
  }

  fn entries(&self) -> MutexGuard<'_, Vec<OutboxEntry>> {
    self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Apply `f` to a copy of the entries, persist it, then commit it in memory.
  fn update<R>(&self, f: impl FnOnce(&mut Vec<OutboxEntry>) -> R) -> Result<R, StoreError> {
    let mut guard = self.entries();
    let mut next = guard.clone();
    let result = f(&mut next);

    let value = serde_json::to_value(&next).map_err(|source| StoreError::Encode {
      key: OUTBOX_KEY.to_string(),
      source,
    })?;
    self.store.set(OUTBOX_KEY, &value)?;
    *guard = next;
    Ok(result)
  }
}
