//! Drains the outbox against the server and folds confirmations back into
//! the cache.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, Provenance, TicketCache};
use crate::error::{StoreError, TransportFailure};
use crate::session::Session;

use super::api_types::decode;
use super::client::{ApiRequest, Transport};
use super::outbox::{AttemptOutcome, Outbox, OutboxEntry, OutboxPayload};
use super::types::{EntityId, Message, Ticket};

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  /// Entries in the outbox when the sweep started
  pub total: usize,
  /// Entries confirmed by this sweep
  pub sent: usize,
  /// Entries still waiting afterwards
  pub pending: usize,
  /// Another sweep was already running; nothing was attempted
  pub skipped: bool,
}

/// Notifications published to the UI as the outbox drains.
#[derive(Debug, Clone)]
pub enum SyncEvent {
  TicketConfirmed {
    local_id: String,
    ticket: Ticket,
  },
  MessageConfirmed {
    local_id: String,
    message: Message,
  },
  EntryFailed {
    local_id: String,
    kind: &'static str,
    error: TransportFailure,
    attempts: u32,
    retryable: bool,
    exhausted: bool,
  },
  SweepFinished(SweepReport),
}

#[derive(Clone)]
pub struct Reconciler {
  transport: Arc<dyn Transport>,
  session: Session,
  cache: TicketCache,
  outbox: Outbox,
  events: broadcast::Sender<SyncEvent>,
  sweep_lock: Arc<Mutex<()>>,
  shutdown: CancellationToken,
}

impl Reconciler {
  pub fn new(
    transport: Arc<dyn Transport>,
    session: Session,
    cache: TicketCache,
    outbox: Outbox,
    events: broadcast::Sender<SyncEvent>,
  ) -> Self {
    Self {
      transport,
      session,
      cache,
      outbox,
      events,
      sweep_lock: Arc::new(Mutex::new(())),
      shutdown: CancellationToken::new(),
    }
  }

  /// Attempt every eligible entry once, oldest first.
  ///
  /// Returns immediately with `skipped` set when another sweep is running.
  pub async fn reconcile_all(&self) -> SweepReport {
    self.reconcile_until(&self.shutdown).await
  }

  /// Like [`Self::reconcile_all`], but stops starting entries once `cancel`
  /// (or the service shutdown) fires. A call already in flight completes.
  pub async fn reconcile_until(&self, cancel: &CancellationToken) -> SweepReport {
    let Ok(_guard) = self.sweep_lock.try_lock() else {
      debug!("sweep already in flight, skipping");
      let waiting = self.outbox.len();
      return SweepReport {
        total: waiting,
        sent: 0,
        pending: waiting,
        skipped: true,
      };
    };

    let cap = self.outbox.cap();
    let ids: Vec<String> = self
      .outbox
      .list_pending()
      .into_iter()
      .map(|e| e.local_id)
      .collect();
    let total = ids.len();
    let mut sent = 0;

    for local_id in ids {
      if cancel.is_cancelled() || self.shutdown.is_cancelled() {
        debug!("sweep cancelled, leaving remaining entries for later");
        break;
      }
      // Re-read: earlier confirmations may have retargeted this entry.
      let Some(entry) = self.outbox.get(&local_id) else {
        continue;
      };
      if !entry.is_eligible(cap) {
        continue;
      }

      match self.deliver(&entry).await {
        Ok(true) => sent += 1,
        Ok(false) => {}
        Err(e) => warn!(local_id = %entry.local_id, error = %e, "failed to record sweep result"),
      }
    }

    let report = SweepReport {
      total,
      sent,
      pending: self.outbox.len(),
      skipped: false,
    };
    if total > 0 {
      info!(total, sent, pending = report.pending, "outbox sweep finished");
    }
    let _ = self.events.send(SyncEvent::SweepFinished(report));
    report
  }

  /// Run a sweep every `period` until the returned handle is cancelled or
  /// dropped. The first sweep happens one period from now.
  pub fn schedule(&self, period: Duration) -> SweepHandle {
    let token = self.shutdown.child_token();
    let cancel = token.clone();
    let reconciler = self.clone();

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => {
            let report = reconciler.reconcile_until(&cancel).await;
            debug!(?report, "scheduled sweep");
          }
        }
      }
    });

    SweepHandle { token, task }
  }

  /// Stop starting new entries and new scheduled sweeps.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
  }

  pub fn is_shut_down(&self) -> bool {
    self.shutdown.is_cancelled()
  }

  /// Wait until no sweep is in flight.
  pub async fn wait_idle(&self) {
    let _guard = self.sweep_lock.lock().await;
  }

  /// Make one attempt at `entry`. Returns whether it was confirmed.
  async fn deliver(&self, entry: &OutboxEntry) -> Result<bool, StoreError> {
    let request = match &entry.payload {
      OutboxPayload::SendMessage(message) if message.ticket.is_local() => {
        debug!(local_id = %entry.local_id, ticket = %message.ticket, "waiting for ticket confirmation");
        return Ok(false);
      }
      OutboxPayload::SendMessage(message) => ApiRequest::send_message(message),
      OutboxPayload::CreateTicket(ticket) => ApiRequest::create_ticket(ticket),
    };

    self.outbox.mark_sending(&entry.local_id)?;
    debug!(local_id = %entry.local_id, kind = entry.payload.kind(), attempts = entry.attempts, "sending");

    let value = match self.transport.call(&request, self.session.credential()).await {
      Ok(value) => value,
      Err(failure) => return self.record_failure(entry, failure),
    };

    match &entry.payload {
      OutboxPayload::CreateTicket(_) => match decode::<Ticket>(value) {
        Ok(ticket) => self.confirm_ticket(entry, ticket)?,
        Err(failure) => return self.record_failure(entry, failure),
      },
      OutboxPayload::SendMessage(_) => match decode::<Message>(value) {
        Ok(message) => self.confirm_message(entry, message)?,
        Err(failure) => return self.record_failure(entry, failure),
      },
    }
    Ok(true)
  }

  fn confirm_ticket(&self, entry: &OutboxEntry, mut ticket: Ticket) -> Result<(), StoreError> {
    let local = EntityId::Local(entry.local_id.clone());
    ticket.is_temporary = false;
    ticket.from_fallback = false;

    self.outbox.retarget(&local, &ticket.id)?;
    self.outbox.mark_attempt(&entry.local_id, AttemptOutcome::Sent)?;
    self.cache.replace_in_list(&local, &ticket)?;
    self.cache.put(
      &CacheKey::Ticket(ticket.id.clone()),
      CacheEntry::Ticket(ticket.clone()),
      Provenance::Live,
    )?;

    info!(local_id = %entry.local_id, ticket = %ticket.id, "ticket confirmed");
    let _ = self.events.send(SyncEvent::TicketConfirmed {
      local_id: entry.local_id.clone(),
      ticket,
    });
    Ok(())
  }

  fn confirm_message(&self, entry: &OutboxEntry, mut message: Message) -> Result<(), StoreError> {
    message.is_temporary = false;

    self.outbox.mark_attempt(&entry.local_id, AttemptOutcome::Sent)?;
    self.cache.append_message(&message)?;

    info!(local_id = %entry.local_id, message = %message.id, ticket = %message.ticket, "message confirmed");
    let _ = self.events.send(SyncEvent::MessageConfirmed {
      local_id: entry.local_id.clone(),
      message,
    });
    Ok(())
  }

  fn record_failure(&self, entry: &OutboxEntry, failure: TransportFailure) -> Result<bool, StoreError> {
    let Some(updated) = self
      .outbox
      .mark_attempt(&entry.local_id, AttemptOutcome::Failed(failure.clone()))?
    else {
      return Ok(false);
    };

    let exhausted = updated.is_exhausted(self.outbox.cap());
    warn!(
      local_id = %updated.local_id,
      attempts = updated.attempts,
      retryable = updated.retryable,
      exhausted,
      error = %failure,
      "delivery failed"
    );
    let _ = self.events.send(SyncEvent::EntryFailed {
      local_id: updated.local_id,
      kind: updated.payload.kind(),
      error: failure,
      attempts: updated.attempts,
      retryable: updated.retryable,
      exhausted,
    });
    Ok(false)
  }
}

/// Handle to a scheduled sweep loop. Dropping it stops the loop.
pub struct SweepHandle {
  token: CancellationToken,
  task: JoinHandle<()>,
}

impl SweepHandle {
  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Cancel the loop and wait for a sweep it is running to finish.
  pub async fn stop(mut self) {
    self.token.cancel();
    let _ = (&mut self.task).await;
  }
}

impl Drop for SweepHandle {
  fn drop(&mut self) {
    self.token.cancel();
  }
}
