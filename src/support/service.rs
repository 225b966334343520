//! Support service that wires the cache, outbox, resolver and reconciler
//! together behind the intents the UI issues.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::{KvStore, Resolved, TicketCache};
use crate::config::SyncSettings;
use crate::error::SupportError;
use crate::session::Session;

use super::api_types::{decode, Assignment, NewMessage, NewTicket, StatusChange};
use super::client::{ApiRequest, Transport};
use super::fallback::FallbackResolver;
use super::outbox::{Outbox, OutboxEntry, OutboxPayload};
use super::reconciler::{Reconciler, SweepHandle, SweepReport, SyncEvent};
use super::retry::with_retry;
use super::types::{EntityId, Message, MessageDraft, Ticket, TicketDraft, TicketFilter, TicketStats, TicketStatus};

const EVENT_CAPACITY: usize = 256;

struct OpenView {
  ticket: EntityId,
  _sweeps: SweepHandle,
}

/// Offline-tolerant support client.
///
/// Reads always produce something renderable. Writes are queued, shown
/// optimistically and delivered in the background.
pub struct SupportService {
  session: Session,
  settings: SyncSettings,
  transport: Arc<dyn Transport>,
  cache: TicketCache,
  outbox: Outbox,
  resolver: FallbackResolver,
  reconciler: Reconciler,
  events: broadcast::Sender<SyncEvent>,
  view: Mutex<Option<OpenView>>,
}

impl SupportService {
  /// Build the service over `store`, restoring any queued writes.
  pub fn init(
    settings: SyncSettings,
    session: Session,
    transport: Arc<dyn Transport>,
    store: Arc<dyn KvStore>,
  ) -> Result<Self, SupportError> {
    let cache = TicketCache::new(store.clone());
    let outbox = Outbox::load(store, settings.attempt_cap)?;
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let resolver = FallbackResolver::new(
      transport.clone(),
      cache.clone(),
      outbox.clone(),
      settings.retry_policy(),
    );
    let reconciler = Reconciler::new(
      transport.clone(),
      session.clone(),
      cache.clone(),
      outbox.clone(),
      events.clone(),
    );

    info!(user = session.user_id, pending = outbox.len(), "support service ready");
    Ok(Self {
      session,
      settings,
      transport,
      cache,
      outbox,
      resolver,
      reconciler,
      events,
      view: Mutex::new(None),
    })
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn attempt_cap(&self) -> u32 {
    self.settings.attempt_cap
  }

  /// Queue a new ticket and return its temporary record.
  pub fn create_ticket(&self, draft: TicketDraft) -> Result<Ticket, SupportError> {
    let title = draft.title.trim();
    let description = draft.description.trim();
    if title.is_empty() {
      return Err(SupportError::Validation("title must not be empty".to_string()));
    }
    if description.is_empty() {
      return Err(SupportError::Validation("description must not be empty".to_string()));
    }

    let payload = NewTicket {
      title: title.to_string(),
      description: description.to_string(),
      priority: draft.priority,
      category: draft.category,
      employee: Some(self.session.owner_id()),
      created_at: draft.submitted_at,
    };
    // The temporary ticket must be listed before a sweep can confirm it.
    let local_id = self
      .outbox
      .enqueue_with(OutboxPayload::CreateTicket(payload.clone()), |local_id| {
        self.cache.append_to_list(Ticket::temporary(local_id, &payload))
      })?;
    let ticket = Ticket::temporary(&local_id, &payload);

    info!(local_id = %local_id, "ticket queued");
    self.kick();
    Ok(ticket)
  }

  /// Queue a message and return its temporary record.
  pub fn send_message(&self, draft: MessageDraft) -> Result<Message, SupportError> {
    let content = draft.content.trim();
    if content.is_empty() {
      return Err(SupportError::Validation("message must not be empty".to_string()));
    }
    if !self.session.is_admin() {
      if let Some(known) = self.resolver.known_ticket(&draft.ticket)? {
        if !known.value.owned_by(self.session.owner_id()) {
          return Err(SupportError::Unauthorized {
            ticket: draft.ticket,
          });
        }
      }
    }

    let payload = NewMessage {
      ticket: draft.ticket,
      content: content.to_string(),
      sender: self.session.user_id,
      created_at: draft.submitted_at,
    };
    let local_id = self.outbox.enqueue(OutboxPayload::SendMessage(payload.clone()))?;
    let message = Message::temporary(&local_id, &payload, self.session.is_admin());

    info!(local_id = %local_id, ticket = %payload.ticket, "message queued");
    self.kick();
    Ok(message)
  }

  pub async fn read_ticket_list(&self, filter: &TicketFilter) -> Resolved<Vec<Ticket>> {
    self.resolver.resolve_list(&self.session, filter).await
  }

  pub async fn read_ticket_detail(&self, id: &EntityId) -> Result<Resolved<Ticket>, SupportError> {
    let resolved = self.resolver.resolve_ticket(&self.session, id).await?;
    self.kick_if_related(&resolved, id);
    Ok(resolved)
  }

  /// Thread of a ticket, with messages still waiting in the outbox last.
  pub async fn read_messages(&self, ticket: &EntityId) -> Result<Resolved<Vec<Message>>, SupportError> {
    let mut resolved = self.resolver.resolve_messages(&self.session, ticket).await?;
    self.kick_if_related(&resolved, ticket);

    let is_admin = self.session.is_admin();
    for entry in self.outbox.pending_for_ticket(ticket) {
      if let OutboxPayload::SendMessage(message) = &entry.payload {
        let id = EntityId::Local(entry.local_id.clone());
        if !resolved.data.iter().any(|m| m.id == id) {
          resolved
            .data
            .push(Message::temporary(&entry.local_id, message, is_admin));
        }
      }
    }
    Ok(resolved)
  }

  /// Give every stuck entry one more chance and sweep now.
  pub async fn retry_pending(&self) -> Result<SweepReport, SupportError> {
    let granted = self.outbox.grant_retry_all()?;
    debug!(granted, "manual retry");
    Ok(self.reconciler.reconcile_all().await)
  }

  /// Retry a single entry now.
  pub async fn retry_entry(&self, local_id: &str) -> Result<SweepReport, SupportError> {
    if !self.outbox.grant_retry(local_id)? {
      return Err(SupportError::UnknownEntry(local_id.to_string()));
    }
    Ok(self.reconciler.reconcile_all().await)
  }

  /// Wait for a running sweep, then run one more.
  pub async fn flush(&self) -> SweepReport {
    self.reconciler.wait_idle().await;
    self.reconciler.reconcile_all().await
  }

  /// Queued writes, optionally only those for one ticket.
  pub fn pending(&self, ticket: Option<&EntityId>) -> Vec<OutboxEntry> {
    match ticket {
      Some(id) => self.outbox.pending_for_ticket(id),
      None => self.outbox.list_pending(),
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  /// Start periodic sweeps for as long as the ticket stays open.
  pub fn open_ticket_view(&self, ticket: EntityId) {
    let sweeps = self.reconciler.schedule(self.settings.sweep_interval());
    debug!(ticket = %ticket, "ticket view opened");
    *self.view() = Some(OpenView {
      ticket,
      _sweeps: sweeps,
    });
  }

  pub fn close_ticket_view(&self) {
    if let Some(view) = self.view().take() {
      debug!(ticket = %view.ticket, "ticket view closed");
    }
  }

  pub fn viewing(&self) -> Option<EntityId> {
    self.view().as_ref().map(|v| v.ticket.clone())
  }

  /// Change a ticket's status on the server. Administrators only; not
  /// queued, so failures are returned to the caller.
  pub async fn change_status(&self, id: &EntityId, status: TicketStatus) -> Result<Ticket, SupportError> {
    let ticket = self
      .admin_update(id, "change ticket status", |server_id| {
        ApiRequest::change_status(server_id, StatusChange { status })
      })
      .await?;
    info!(ticket = %ticket.id, status = %ticket.status, "status changed");
    Ok(ticket)
  }

  /// Hand a ticket to another administrator. Online only, like
  /// [`Self::change_status`].
  pub async fn assign_ticket(&self, id: &EntityId, admin_id: u64) -> Result<Ticket, SupportError> {
    let ticket = self
      .admin_update(id, "assign tickets", |server_id| {
        ApiRequest::assign(server_id, Assignment { admin_id })
      })
      .await?;
    info!(ticket = %ticket.id, admin = admin_id, status = %ticket.status, "ticket assigned");
    Ok(ticket)
  }

  pub async fn ticket_stats(&self) -> Result<Resolved<TicketStats>, SupportError> {
    self.resolver.resolve_stats(&self.session).await
  }

  /// Stop scheduled sweeps and wait for an in-flight one to finish.
  pub async fn dispose(&self) {
    self.close_ticket_view();
    self.reconciler.shutdown();
    self.reconciler.wait_idle().await;
    info!(pending = self.outbox.len(), "support service stopped");
  }

  /// Send an administrator's direct write and fold the returned ticket,
  /// including the server's notice in its thread, into the cache.
  async fn admin_update(
    &self,
    id: &EntityId,
    action: &'static str,
    build: impl FnOnce(u64) -> ApiRequest,
  ) -> Result<Ticket, SupportError> {
    if !self.session.is_admin() {
      return Err(SupportError::Forbidden { action });
    }
    let Some(server_id) = id.as_server() else {
      return Err(SupportError::Validation(format!(
        "ticket {} has not been confirmed by the server yet",
        id
      )));
    };

    let request = &build(server_id);
    let transport = &self.transport;
    let credential = self.session.credential();
    let value = with_retry(self.settings.retry_policy(), move || transport.call(request, credential)).await?;
    let ticket: Ticket = decode(value)?;

    self.resolver.remember_ticket(&ticket);
    self.resolver.remember_thread(&ticket);
    Ok(ticket)
  }

  /// Sweep in the background.
  fn kick(&self) {
    if self.reconciler.is_shut_down() {
      return;
    }
    let reconciler = self.reconciler.clone();
    tokio::spawn(async move {
      reconciler.reconcile_all().await;
    });
  }

  /// A live read means the server is reachable; flush writes for the ticket.
  fn kick_if_related<T>(&self, resolved: &Resolved<T>, ticket: &EntityId) {
    if resolved.is_live() && !self.outbox.pending_for_ticket(ticket).is_empty() {
      debug!(ticket = %ticket, "server reachable, sweeping related writes");
      self.kick();
    }
  }

  fn view(&self) -> MutexGuard<'_, Option<OpenView>> {
    self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, CacheKey, MemoryStore, Provenance, SqliteStore};
  use crate::error::TransportFailure;
  use crate::support::outbox::EntryStatus;
  use crate::support::testing::{
    accept_writes, admin_session, message_json, other_session, standard_session, ticket_json, ScriptedTransport,
  };
  use std::time::Duration;

  fn service_with(
    transport: Arc<ScriptedTransport>,
    session: Session,
  ) -> (SupportService, TicketCache) {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let service = SupportService::init(SyncSettings::default(), session, transport, store.clone()).unwrap();
    (service, TicketCache::new(store))
  }

  fn seed_ticket(cache: &TicketCache, id: u64, owner: u64) {
    let ticket: Ticket = serde_json::from_value(ticket_json(id, owner, &format!("ticket {}", id))).unwrap();
    cache
      .put(&CacheKey::Ticket(ticket.id.clone()), CacheEntry::Ticket(ticket.clone()), Provenance::Live)
      .unwrap();
    cache.merge_into_list(&[ticket]).unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_create_shows_temporary_ticket() {
    let (service, _) = service_with(ScriptedTransport::offline(), standard_session());

    let ticket = service
      .create_ticket(TicketDraft::new("Printer broken", "Paper jam on floor 3"))
      .unwrap();
    assert!(ticket.is_temporary);
    assert!(ticket.id.is_local());

    let list = service.read_ticket_list(&TicketFilter::default()).await;
    assert_eq!(list.provenance, Provenance::Cache);
    assert_eq!(list.data.len(), 1);
    assert_eq!(list.data[0].id, ticket.id);
    assert!(list.data[0].is_temporary);

    let pending = service.pending(None);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload.kind(), "create_ticket");
    service.dispose().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_error_serves_cached_ticket() {
    let transport = ScriptedTransport::server_error();
    let (service, cache) = service_with(transport.clone(), standard_session());
    seed_ticket(&cache, 42, 3);

    let resolved = service.read_ticket_detail(&EntityId::Server(42)).await.unwrap();
    assert_eq!(resolved.provenance, Provenance::Cache);
    assert_eq!(resolved.data.id, EntityId::Server(42));
    assert!(resolved.data.from_fallback);
    // one retry for the transient failure
    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unknown_ticket_gets_placeholder() {
    let (service, _) = service_with(ScriptedTransport::offline(), standard_session());

    let resolved = service.read_ticket_detail(&EntityId::Server(99)).await.unwrap();
    assert_eq!(resolved.provenance, Provenance::EmptyFallback);
    assert_eq!(resolved.data.id, EntityId::Server(99));
    assert!(resolved.data.unavailable);
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_entry_is_reported_not_attempted() {
    let transport = ScriptedTransport::offline();
    let (service, _) = service_with(transport.clone(), standard_session());
    service.create_ticket(TicketDraft::new("VPN", "drops hourly")).unwrap();

    for _ in 0..6 {
      service.flush().await;
    }
    assert_eq!(transport.call_count(), 5);

    let entry = &service.pending(None)[0];
    assert_eq!(entry.attempts, 5);
    assert_eq!(entry.status, EntryStatus::Failed);
    assert!(entry.is_exhausted(service.attempt_cap()));

    let report = service.flush().await;
    assert_eq!(report.pending, 1);
    assert_eq!(transport.call_count(), 5);

    // a manual retry allows exactly one more attempt
    service.retry_pending().await.unwrap();
    assert_eq!(transport.call_count(), 6);
    assert_eq!(service.pending(None)[0].attempts, 6);
  }

  #[tokio::test(start_paused = true)]
  async fn test_manual_retry_during_sweep_is_skipped() {
    let transport = ScriptedTransport::gated(accept_writes(300));
    let (service, _) = service_with(transport.clone(), standard_session());
    service.create_ticket(TicketDraft::new("Monitor", "flickers")).unwrap();

    transport.wait_entered().await;
    let report = service.retry_pending().await.unwrap();
    assert!(report.skipped);
    assert_eq!(transport.call_count(), 1);

    transport.release();
    service.dispose().await;
    assert_eq!(transport.call_count(), 1);
    assert!(service.pending(None).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_ticket_round_trip_leaves_no_duplicate() {
    let transport = ScriptedTransport::offline();
    let (service, _) = service_with(transport.clone(), standard_session());
    let mut events = service.subscribe();

    let temp = service.create_ticket(TicketDraft::new("Keyboard", "sticky keys")).unwrap();
    service.flush().await;
    assert_eq!(service.pending(None).len(), 1);

    transport.respond_with(accept_writes(700));
    service.flush().await;
    assert!(service.pending(None).is_empty());

    // reads still fail, so the list comes from the cache
    let list = service.read_ticket_list(&TicketFilter::default()).await;
    assert_eq!(list.data.len(), 1);
    assert_eq!(list.data[0].id, EntityId::Server(700));
    assert!(!list.data.iter().any(|t| t.id == temp.id));

    let confirmed = loop {
      match events.recv().await.unwrap() {
        SyncEvent::TicketConfirmed { local_id, ticket } => break (local_id, ticket),
        _ => continue,
      }
    };
    assert_eq!(EntityId::Local(confirmed.0), temp.id);
    assert_eq!(confirmed.1.id, EntityId::Server(700));
  }

  #[tokio::test(start_paused = true)]
  async fn test_duplicate_submission_is_queued_once() {
    let (service, _) = service_with(ScriptedTransport::offline(), standard_session());
    let draft = TicketDraft::new("Mouse", "double clicks");

    let first = service.create_ticket(draft.clone()).unwrap();
    let second = service.create_ticket(draft).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(service.pending(None).len(), 1);

    let list = service.read_ticket_list(&TicketFilter::default()).await;
    assert_eq!(list.data.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_validation() {
    let (service, _) = service_with(ScriptedTransport::offline(), standard_session());
    assert!(matches!(
      service.create_ticket(TicketDraft::new("  ", "x")),
      Err(SupportError::Validation(_))
    ));
    assert!(matches!(
      service.create_ticket(TicketDraft::new("x", "")),
      Err(SupportError::Validation(_))
    ));
    assert!(matches!(
      service.send_message(MessageDraft::new(EntityId::Server(1), "\n")),
      Err(SupportError::Validation(_))
    ));
    assert!(service.pending(None).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cannot_message_another_users_ticket() {
    let (service, cache) = service_with(ScriptedTransport::offline(), other_session());
    seed_ticket(&cache, 5, 3);

    let result = service.send_message(MessageDraft::new(EntityId::Server(5), "let me in"));
    assert!(matches!(result, Err(SupportError::Unauthorized { .. })));
    assert!(service.pending(None).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_queued_message_appears_in_thread() {
    let (service, cache) = service_with(ScriptedTransport::offline(), standard_session());
    seed_ticket(&cache, 5, 3);

    let message = service
      .send_message(MessageDraft::new(EntityId::Server(5), "any update?"))
      .unwrap();
    assert!(message.is_temporary);

    let thread = service.read_messages(&EntityId::Server(5)).await.unwrap();
    assert_eq!(thread.data.len(), 1);
    assert_eq!(thread.data[0].id, message.id);
    assert_eq!(service.pending(Some(&EntityId::Server(5))).len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_live_read_flushes_related_writes() {
    let transport = ScriptedTransport::offline();
    let (service, cache) = service_with(transport.clone(), standard_session());
    seed_ticket(&cache, 5, 3);
    service
      .send_message(MessageDraft::new(EntityId::Server(5), "ping"))
      .unwrap();
    service.flush().await;
    assert_eq!(service.pending(None).len(), 1);

    let mut writes = accept_writes(900);
    transport.respond_with(move |req| match req.path.as_str() {
      "tickets/5/" => Ok(ticket_json(5, 3, "ticket 5")),
      _ => writes(req),
    });

    let detail = service.read_ticket_detail(&EntityId::Server(5)).await.unwrap();
    assert!(detail.is_live());
    service.flush().await;
    assert!(service.pending(None).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_change_status() {
    let transport = ScriptedTransport::new(|req| {
      assert_eq!(req.path, "tickets/8/change_status/");
      assert_eq!(req.body.as_ref().unwrap()["status"], "resolved");
      let mut ticket = ticket_json(8, 3, "Laptop");
      ticket["status"] = serde_json::json!("resolved");
      Ok(ticket)
    });
    let (admin, cache) = service_with(transport, admin_session());

    let ticket = admin
      .change_status(&EntityId::Server(8), TicketStatus::Resolved)
      .await
      .unwrap();
    assert_eq!(ticket.status, TicketStatus::Resolved);
    let cached = cache.get_ticket(&EntityId::Server(8)).unwrap().unwrap();
    assert_eq!(cached.value.status, TicketStatus::Resolved);

    let (standard, _) = service_with(ScriptedTransport::offline(), standard_session());
    assert!(matches!(
      standard.change_status(&EntityId::Server(8), TicketStatus::Closed).await,
      Err(SupportError::Forbidden { .. })
    ));
    assert!(matches!(
      admin
        .change_status(&EntityId::Local("local-x".into()), TicketStatus::Closed)
        .await,
      Err(SupportError::Validation(_))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn test_change_status_rejection_propagates() {
    let transport = ScriptedTransport::new(|_| {
      Err(TransportFailure::Client {
        status: 400,
        body: "Invalid status".into(),
      })
    });
    let (admin, _) = service_with(transport.clone(), admin_session());
    let result = admin.change_status(&EntityId::Server(8), TicketStatus::Closed).await;
    assert!(matches!(
      result,
      Err(SupportError::Transport(TransportFailure::Client { status: 400, .. }))
    ));
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_open_view_sweeps_until_closed() {
    let transport = ScriptedTransport::offline();
    let (service, cache) = service_with(transport.clone(), standard_session());
    seed_ticket(&cache, 5, 3);
    service.send_message(MessageDraft::new(EntityId::Server(5), "hello")).unwrap();
    tokio::task::yield_now().await;
    service.flush().await;
    let baseline = transport.call_count();

    service.open_ticket_view(EntityId::Server(5));
    assert_eq!(service.viewing(), Some(EntityId::Server(5)));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(transport.call_count(), baseline + 2);

    service.close_ticket_view();
    assert!(service.viewing().is_none());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.call_count(), baseline + 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_closing_view_stops_sweep_in_flight() {
    let transport = ScriptedTransport::gated(accept_writes(900));
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let outbox = Outbox::load(store.clone(), 5).unwrap();
    for content in ["one", "two", "three"] {
      outbox
        .enqueue(OutboxPayload::SendMessage(NewMessage {
          ticket: EntityId::Server(5),
          content: content.to_string(),
          sender: 10,
          created_at: chrono::Utc::now(),
        }))
        .unwrap();
    }
    let service = SupportService::init(SyncSettings::default(), standard_session(), transport.clone(), store).unwrap();

    service.open_ticket_view(EntityId::Server(5));
    tokio::time::sleep(Duration::from_secs(31)).await;
    transport.wait_entered().await;
    assert_eq!(transport.call_count(), 1);

    service.close_ticket_view();
    transport.release();
    tokio::time::timeout(Duration::from_secs(5), service.reconciler.wait_idle())
      .await
      .unwrap();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(service.pending(None).len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_assign_ticket() {
    let transport = ScriptedTransport::new(|req| {
      assert_eq!(req.path, "tickets/8/assign/");
      assert_eq!(req.body.as_ref().unwrap()["admin_id"], 2);
      let mut ticket = ticket_json(8, 3, "Laptop");
      ticket["status"] = serde_json::json!("in_progress");
      ticket["assigned_to"] = serde_json::json!(2);
      Ok(ticket)
    });
    let (admin, cache) = service_with(transport, admin_session());

    let ticket = admin.assign_ticket(&EntityId::Server(8), 2).await.unwrap();
    assert_eq!(ticket.assigned_to, Some(2));
    assert_eq!(ticket.status, TicketStatus::InProgress);
    let cached = cache.get_ticket(&EntityId::Server(8)).unwrap().unwrap();
    assert_eq!(cached.value.assigned_to, Some(2));
    assert!(cache.find_in_list(&EntityId::Server(8)).unwrap().is_some());

    let (standard, _) = service_with(ScriptedTransport::offline(), standard_session());
    assert!(matches!(
      standard.assign_ticket(&EntityId::Server(8), 2).await,
      Err(SupportError::Forbidden { .. })
    ));
    assert!(matches!(
      admin.assign_ticket(&EntityId::Local("local-x".into()), 2).await,
      Err(SupportError::Validation(_))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn test_status_change_refreshes_cached_thread() {
    let transport = ScriptedTransport::new(|_| {
      let mut ticket = ticket_json(8, 3, "Laptop");
      ticket["status"] = serde_json::json!("closed");
      ticket["messages"] = serde_json::json!([
        message_json(1, 8, 10, "screen is black"),
        message_json(2, 8, 1, "This ticket has been closed."),
      ]);
      Ok(ticket)
    });
    let (admin, cache) = service_with(transport.clone(), admin_session());
    let first: Message = serde_json::from_value(message_json(1, 8, 10, "screen is black")).unwrap();
    cache
      .put(
        &CacheKey::Messages(EntityId::Server(8)),
        CacheEntry::MessageList(vec![first]),
        Provenance::Live,
      )
      .unwrap();

    admin
      .change_status(&EntityId::Server(8), TicketStatus::Closed)
      .await
      .unwrap();

    transport.respond_with(|_| Err(TransportFailure::no_response("offline")));
    let thread = admin.read_messages(&EntityId::Server(8)).await.unwrap();
    assert_eq!(thread.provenance, Provenance::Cache);
    assert_eq!(thread.data.len(), 2);
    assert_eq!(thread.data[1].content, "This ticket has been closed.");

    // a response without a thread leaves no stale copy behind
    transport.respond_with(|_| Ok(ticket_json(8, 3, "Laptop")));
    admin
      .change_status(&EntityId::Server(8), TicketStatus::Open)
      .await
      .unwrap();
    assert!(cache.get_messages(&EntityId::Server(8)).unwrap().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_outbox_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let temp = {
      let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&path).unwrap());
      let service = SupportService::init(
        SyncSettings::default(),
        standard_session(),
        ScriptedTransport::offline(),
        store,
      )
      .unwrap();
      let temp = service.create_ticket(TicketDraft::new("Chair", "wobbles")).unwrap();
      service.dispose().await;
      temp
    };

    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let transport = ScriptedTransport::accepting(55);
    let service = SupportService::init(SyncSettings::default(), standard_session(), transport, store).unwrap();
    let pending = service.pending(None);
    assert_eq!(pending.len(), 1);
    assert_eq!(EntityId::Local(pending[0].local_id.clone()), temp.id);

    let report = service.flush().await;
    assert_eq!(report.sent, 1);
    let list = service.read_ticket_list(&TicketFilter::default()).await;
    assert_eq!(list.data[0].id, EntityId::Server(55));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stats_for_admin_only() {
    let (standard, _) = service_with(ScriptedTransport::offline(), standard_session());
    assert!(matches!(
      standard.ticket_stats().await,
      Err(SupportError::Forbidden { .. })
    ));

    let (admin, _) = service_with(ScriptedTransport::offline(), admin_session());
    let stats = admin.ticket_stats().await.unwrap();
    assert_eq!(stats.provenance, Provenance::EmptyFallback);
    assert_eq!(stats.data.total, 0);
  }
}
