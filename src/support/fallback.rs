//! Tiered resolution of reads: live, then cache, then a scan of cached
//! collections, then a placeholder.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, Cached, Provenance, Resolved, TicketCache};
use crate::error::{StoreError, SupportError, TransportFailure};
use crate::session::Session;

use super::api_types::{decode, decode_list};
use super::client::{ApiRequest, Transport};
use super::outbox::{Outbox, OutboxPayload};
use super::retry::{with_retry, RetryPolicy};
use super::types::{EntityId, Message, Ticket, TicketFilter, TicketStats};

#[derive(Clone)]
pub struct FallbackResolver {
  transport: Arc<dyn Transport>,
  cache: TicketCache,
  outbox: Outbox,
  policy: RetryPolicy,
}

impl FallbackResolver {
  pub fn new(transport: Arc<dyn Transport>, cache: TicketCache, outbox: Outbox, policy: RetryPolicy) -> Self {
    Self {
      transport,
      cache,
      outbox,
      policy,
    }
  }

  /// Resolve one ticket. Only fails when the caller may not see it.
  pub async fn resolve_ticket(&self, session: &Session, id: &EntityId) -> Result<Resolved<Ticket>, SupportError> {
    let failure = match id.as_server() {
      Some(server_id) => match self.fetch::<Ticket>(session, ApiRequest::ticket_detail(server_id)).await {
        Ok(ticket) => {
          self.remember_ticket(&ticket);
          return Ok(Resolved::live(ticket));
        }
        Err(failure) => Some(failure),
      },
      None => None,
    };
    warn_fallback(&CacheKey::Ticket(id.clone()), failure.as_ref());

    if let Some(cached) = self.known_ticket(id)? {
      authorize(session, &cached.value)?;
      return Ok(Resolved::cached(cached.value.into_fallback(), cached.cached_at, failure));
    }

    debug!(ticket = %id, "nothing cached, synthesizing placeholder");
    Ok(Resolved::empty(Ticket::placeholder(id.clone()), failure))
  }

  /// Resolve the thread of a ticket.
  ///
  /// Cached threads are only served to non-administrators when the owning
  /// ticket is known locally and belongs to them.
  pub async fn resolve_messages(
    &self,
    session: &Session,
    ticket: &EntityId,
  ) -> Result<Resolved<Vec<Message>>, SupportError> {
    let key = CacheKey::Messages(ticket.clone());
    let failure = match ticket.as_server() {
      Some(server_id) => match self.fetch_list::<Message>(session, ApiRequest::messages(server_id)).await {
        Ok(messages) => {
          if let Err(e) = self.cache.put(&key, CacheEntry::MessageList(messages.clone()), Provenance::Live) {
            warn!(error = %e, "failed to cache messages");
          }
          return Ok(Resolved::live(messages));
        }
        Err(failure) => Some(failure),
      },
      None => None,
    };
    warn_fallback(&key, failure.as_ref());

    let owner = self.known_ticket(ticket)?;
    if !session.is_admin() {
      match &owner {
        Some(cached) => authorize(session, &cached.value)?,
        None => {
          debug!(ticket = %ticket, "owner unknown, not serving cached thread");
          return Ok(Resolved::empty(Vec::new(), failure));
        }
      }
    }

    if let Some(cached) = self.cache.get_messages(ticket).or_else(miss)? {
      return Ok(Resolved::cached(cached.value, cached.cached_at, failure));
    }
    if let Some(cached) = owner.filter(|c| !c.value.messages.is_empty()) {
      return Ok(Resolved::cached(cached.value.messages, cached.cached_at, failure));
    }

    Ok(Resolved::empty(Vec::new(), failure))
  }

  /// Resolve the ticket list visible to the caller.
  pub async fn resolve_list(&self, session: &Session, filter: &TicketFilter) -> Resolved<Vec<Ticket>> {
    let filter = &filter.scoped(session.is_admin());
    let request = ApiRequest::ticket_list(filter, session.is_admin());
    let failure = match self.fetch_list::<Ticket>(session, request).await {
      Ok(tickets) => {
        let tickets = self.overlay_pending(session, filter, tickets);
        let stored = if filter.is_empty() {
          self
            .cache
            .put(&CacheKey::TicketList, CacheEntry::TicketList(tickets.clone()), Provenance::Live)
        } else {
          self.cache.merge_into_list(&tickets)
        };
        if let Err(e) = stored {
          warn!(error = %e, "failed to cache ticket list");
        }
        return Resolved::live(tickets);
      }
      Err(failure) => failure,
    };
    warn_fallback(&CacheKey::TicketList, Some(&failure));

    let cached = match self.cache.get_ticket_list() {
      Ok(cached) => cached,
      Err(e) => {
        warn!(error = %e, "ignoring unreadable ticket list");
        None
      }
    };
    match cached {
      Some(cached) => {
        let visible = cached
          .value
          .into_iter()
          .filter(|t| session.is_admin() || t.owned_by(session.owner_id()))
          .filter(|t| filter.matches(t))
          .map(Ticket::into_fallback)
          .collect();
        Resolved::cached(visible, cached.cached_at, Some(failure))
      }
      None => Resolved::empty(Vec::new(), Some(failure)),
    }
  }

  /// Ticket counts for administrators.
  pub async fn resolve_stats(&self, session: &Session) -> Result<Resolved<TicketStats>, SupportError> {
    if !session.is_admin() {
      return Err(SupportError::Forbidden {
        action: "view ticket statistics",
      });
    }

    let failure = match self.fetch::<TicketStats>(session, ApiRequest::ticket_stats()).await {
      Ok(stats) => return Ok(Resolved::live(stats)),
      Err(failure) => failure,
    };
    warn!(error = %failure, "stats unavailable, computing from cache");

    Ok(match self.cache.get_ticket_list().or_else(miss)? {
      Some(cached) => {
        let confirmed: Vec<Ticket> = cached.value.into_iter().filter(|t| !t.is_temporary).collect();
        Resolved::cached(TicketStats::from_tickets(&confirmed), cached.cached_at, Some(failure))
      }
      None => Resolved::empty(TicketStats::default(), Some(failure)),
    })
  }

  /// Store a confirmed ticket as its own record and in the list.
  pub fn remember_ticket(&self, ticket: &Ticket) {
    let stored = self
      .cache
      .put(
        &CacheKey::Ticket(ticket.id.clone()),
        CacheEntry::Ticket(ticket.clone()),
        Provenance::Live,
      )
      .and_then(|_| self.cache.merge_into_list(std::slice::from_ref(ticket)));
    if let Err(e) = stored {
      warn!(ticket = %ticket.id, error = %e, "failed to cache ticket");
    }
  }

  /// Replace the cached thread with the one embedded in a fresh ticket
  /// record, or forget it when the record carries none.
  pub fn remember_thread(&self, ticket: &Ticket) {
    let key = CacheKey::Messages(ticket.id.clone());
    let stored = if ticket.messages.is_empty() {
      self.cache.remove(&key)
    } else {
      self
        .cache
        .put(&key, CacheEntry::MessageList(ticket.messages.clone()), Provenance::Live)
    };
    if let Err(e) = stored {
      warn!(ticket = %ticket.id, error = %e, "failed to refresh cached thread");
    }
  }

  async fn fetch<T: DeserializeOwned>(&self, session: &Session, request: ApiRequest) -> Result<T, TransportFailure> {
    let value = self.call(session, &request).await?;
    decode(value)
  }

  async fn fetch_list<T: DeserializeOwned>(
    &self,
    session: &Session,
    request: ApiRequest,
  ) -> Result<Vec<T>, TransportFailure> {
    let value = self.call(session, &request).await?;
    decode_list(value)
  }

  async fn call(&self, session: &Session, request: &ApiRequest) -> Result<serde_json::Value, TransportFailure> {
    let transport = &self.transport;
    with_retry(self.policy, move || transport.call(request, session.credential())).await
  }

  /// Cached detail of a ticket, its entry in the cached list, or its
  /// pending creation.
  pub(crate) fn known_ticket(&self, id: &EntityId) -> Result<Option<Cached<Ticket>>, SupportError> {
    if let Some(cached) = self.cache.get_ticket(id).or_else(miss)? {
      return Ok(Some(cached));
    }
    if let Some(cached) = self.cache.find_in_list(id).or_else(miss)? {
      return Ok(Some(cached));
    }
    Ok(self.pending_creation(id).map(|value| Cached {
      value,
      provenance: Provenance::Cache,
      cached_at: chrono::Utc::now(),
    }))
  }

  /// The temporary ticket of a creation still waiting in the outbox.
  fn pending_creation(&self, id: &EntityId) -> Option<Ticket> {
    let EntityId::Local(local_id) = id else {
      return None;
    };
    match self.outbox.get(local_id)?.payload {
      OutboxPayload::CreateTicket(draft) => Some(Ticket::temporary(local_id, &draft)),
      OutboxPayload::SendMessage(_) => None,
    }
  }

  /// Put tickets still waiting to be created in front of a live list.
  fn overlay_pending(&self, session: &Session, filter: &TicketFilter, live: Vec<Ticket>) -> Vec<Ticket> {
    let mut pending: Vec<Ticket> = self
      .outbox
      .list_pending()
      .into_iter()
      .filter_map(|entry| match entry.payload {
        OutboxPayload::CreateTicket(draft) => Some(Ticket::temporary(&entry.local_id, &draft)),
        OutboxPayload::SendMessage(_) => None,
      })
      .filter(|t| session.is_admin() || t.owned_by(session.owner_id()))
      .filter(|t| filter.matches(t))
      .collect();
    // newest first, like the server's ordering
    pending.reverse();
    pending.extend(live);
    pending
  }
}

/// Non-administrators only see their own tickets.
fn authorize(session: &Session, ticket: &Ticket) -> Result<(), SupportError> {
  if session.is_admin() || ticket.owned_by(session.owner_id()) {
    Ok(())
  } else {
    warn!(ticket = %ticket.id, user = session.user_id, "refusing to serve another user's ticket");
    Err(SupportError::Unauthorized {
      ticket: ticket.id.clone(),
    })
  }
}

/// Unreadable cache records are treated as absent.
fn miss<T>(error: StoreError) -> Result<Option<T>, SupportError> {
  warn!(error = %error, "ignoring unreadable cache record");
  Ok(None)
}

fn warn_fallback(key: &CacheKey, failure: Option<&TransportFailure>) {
  if let Some(failure) = failure {
    warn!(what = %key.description(), error = %failure, "live read failed, falling back");
  }
}
