//! Domain types for support tickets and their message threads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::api_types::{NewMessage, NewTicket};

/// Identity of a ticket or message.
///
/// Server records carry the integer id assigned by the backend. Records minted
/// on this client before confirmation carry a local id (`local-<uuid>`), which
/// serializes as a JSON string and so never collides with a server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Server(u64),
  Local(String),
}

const LOCAL_PREFIX: &str = "local-";

impl EntityId {
  /// Mint a fresh local id.
  pub fn new_local() -> Self {
    EntityId::Local(format!("{}{}", LOCAL_PREFIX, uuid::Uuid::new_v4()))
  }

  pub fn is_local(&self) -> bool {
    matches!(self, EntityId::Local(_))
  }

  pub fn as_server(&self) -> Option<u64> {
    match self {
      EntityId::Server(id) => Some(*id),
      EntityId::Local(_) => None,
    }
  }
}

impl From<u64> for EntityId {
  fn from(id: u64) -> Self {
    EntityId::Server(id)
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Server(id) => write!(f, "{}", id),
      EntityId::Local(id) => f.write_str(id),
    }
  }
}

impl FromStr for EntityId {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if let Ok(id) = s.parse::<u64>() {
      return Ok(EntityId::Server(id));
    }
    if s.starts_with(LOCAL_PREFIX) && s.len() > LOCAL_PREFIX.len() {
      return Ok(EntityId::Local(s.to_string()));
    }
    Err(format!(
      "'{}' is neither a ticket number nor a local id ({}...)",
      s, LOCAL_PREFIX
    ))
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
  Low,
  #[default]
  Medium,
  High,
  Urgent,
}

impl Priority {
  pub fn as_str(&self) -> &'static str {
    match self {
      Priority::Low => "low",
      Priority::Medium => "medium",
      Priority::High => "high",
      Priority::Urgent => "urgent",
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "low" => Ok(Priority::Low),
      "medium" => Ok(Priority::Medium),
      "high" => Ok(Priority::High),
      "urgent" => Ok(Priority::Urgent),
      other => Err(format!("unknown priority '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
  #[default]
  Open,
  InProgress,
  Resolved,
  Closed,
}

impl TicketStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TicketStatus::Open => "open",
      TicketStatus::InProgress => "in_progress",
      TicketStatus::Resolved => "resolved",
      TicketStatus::Closed => "closed",
    }
  }
}

impl fmt::Display for TicketStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TicketStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().replace('-', "_").as_str() {
      "open" => Ok(TicketStatus::Open),
      "in_progress" => Ok(TicketStatus::InProgress),
      "resolved" => Ok(TicketStatus::Resolved),
      "closed" => Ok(TicketStatus::Closed),
      other => Err(format!("unknown ticket status '{}'", other)),
    }
  }
}

/// Short preview of the newest message, as carried by ticket list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
  pub content: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub is_from_admin: bool,
}

/// A support ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
  pub id: EntityId,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub category: Option<String>,
  /// Owning employee
  #[serde(default)]
  pub employee: Option<u64>,
  #[serde(default)]
  pub employee_name: Option<String>,
  #[serde(default)]
  pub assigned_to: Option<u64>,
  #[serde(default)]
  pub status: TicketStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Thread, only present on detail responses
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub messages: Vec<Message>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub latest_message: Option<MessagePreview>,
  #[serde(default)]
  pub unread_messages_count: u32,
  /// Minted on this client and not yet confirmed by the server
  #[serde(default)]
  pub is_temporary: bool,
  /// Served from the local cache or synthesized rather than freshly confirmed
  #[serde(default)]
  pub from_fallback: bool,
  /// Placeholder carrying only an id because no data was available
  #[serde(default)]
  pub unavailable: bool,
}

impl Ticket {
  /// Build the optimistic record shown while a creation waits in the outbox.
  pub fn temporary(local_id: &str, draft: &NewTicket) -> Self {
    Self {
      id: EntityId::Local(local_id.to_string()),
      title: draft.title.clone(),
      description: draft.description.clone(),
      priority: draft.priority,
      category: draft.category.clone(),
      employee: draft.employee,
      employee_name: None,
      assigned_to: None,
      status: TicketStatus::Open,
      created_at: draft.created_at,
      updated_at: draft.created_at,
      messages: Vec::new(),
      latest_message: None,
      unread_messages_count: 0,
      is_temporary: true,
      from_fallback: false,
      unavailable: false,
    }
  }

  /// Synthesize a record for a ticket nothing is known about.
  pub fn placeholder(id: EntityId) -> Self {
    let now = Utc::now();
    Self {
      id,
      title: "Ticket data unavailable".to_string(),
      description: String::new(),
      priority: Priority::default(),
      category: None,
      employee: None,
      employee_name: None,
      assigned_to: None,
      status: TicketStatus::default(),
      created_at: now,
      updated_at: now,
      messages: Vec::new(),
      latest_message: None,
      unread_messages_count: 0,
      is_temporary: false,
      from_fallback: true,
      unavailable: true,
    }
  }

  pub fn owned_by(&self, owner: u64) -> bool {
    self.employee == Some(owner)
  }

  /// Mark a cached copy as not freshly confirmed.
  pub fn into_fallback(mut self) -> Self {
    self.from_fallback = true;
    self
  }

  /// Copy suitable for the ticket list, without the embedded thread.
  pub fn summary(&self) -> Self {
    Self {
      messages: Vec::new(),
      ..self.clone()
    }
  }
}

/// A message in a ticket thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub id: EntityId,
  pub ticket: EntityId,
  pub sender: u64,
  #[serde(default)]
  pub sender_name: Option<String>,
  pub content: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub is_from_admin: bool,
  #[serde(default)]
  pub is_read: bool,
  #[serde(default)]
  pub is_temporary: bool,
}

impl Message {
  /// Build the optimistic record shown while a send waits in the outbox.
  pub fn temporary(local_id: &str, draft: &NewMessage, is_from_admin: bool) -> Self {
    Self {
      id: EntityId::Local(local_id.to_string()),
      ticket: draft.ticket.clone(),
      sender: draft.sender,
      sender_name: None,
      content: draft.content.clone(),
      created_at: draft.created_at,
      is_from_admin,
      is_read: false,
      is_temporary: true,
    }
  }
}

/// A ticket the user wants to open.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketDraft {
  pub title: String,
  pub description: String,
  pub priority: Priority,
  pub category: Option<String>,
  /// When the user submitted the form; identifies duplicate submissions
  pub submitted_at: DateTime<Utc>,
}

impl TicketDraft {
  pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      description: description.into(),
      priority: Priority::default(),
      category: None,
      submitted_at: Utc::now(),
    }
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_category(mut self, category: Option<String>) -> Self {
    self.category = category.filter(|c| !c.trim().is_empty());
    self
  }
}

/// A message the user wants to post to a ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
  pub ticket: EntityId,
  pub content: String,
  pub submitted_at: DateTime<Utc>,
}

impl MessageDraft {
  pub fn new(ticket: EntityId, content: impl Into<String>) -> Self {
    Self {
      ticket,
      content: content.into(),
      submitted_at: Utc::now(),
    }
  }
}

/// Filter for ticket list reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketFilter {
  pub status: Option<TicketStatus>,
  /// Administrators only
  pub priority: Option<Priority>,
  /// Administrators only; owning employee
  pub employee: Option<u64>,
  /// Administrators only; case-insensitive match on title or description
  pub search: Option<String>,
}

impl TicketFilter {
  pub fn status(status: TicketStatus) -> Self {
    Self {
      status: Some(status),
      ..Default::default()
    }
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = Some(priority);
    self
  }

  pub fn with_employee(mut self, employee: u64) -> Self {
    self.employee = Some(employee);
    self
  }

  pub fn with_search(mut self, search: impl Into<String>) -> Self {
    let search = search.into();
    self.search = if search.trim().is_empty() { None } else { Some(search) };
    self
  }

  /// The part of the filter the server honors for this role. Regular
  /// users can only narrow their own list by status.
  pub fn scoped(&self, admin: bool) -> Self {
    if admin {
      self.clone()
    } else {
      Self {
        status: self.status,
        ..Default::default()
      }
    }
  }

  pub fn is_empty(&self) -> bool {
    self.status.is_none() && self.priority.is_none() && self.employee.is_none() && self.search.is_none()
  }

  pub fn matches(&self, ticket: &Ticket) -> bool {
    self.status.map_or(true, |s| ticket.status == s)
      && self.priority.map_or(true, |p| ticket.priority == p)
      && self.employee.map_or(true, |e| ticket.owned_by(e))
      && self.search.as_deref().map_or(true, |q| {
        let q = q.trim().to_lowercase();
        ticket.title.to_lowercase().contains(&q) || ticket.description.to_lowercase().contains(&q)
      })
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
  #[serde(default)]
  pub open: u64,
  #[serde(default)]
  pub in_progress: u64,
  #[serde(default)]
  pub resolved: u64,
  #[serde(default)]
  pub closed: u64,
}

/// Aggregate ticket counts shown to administrators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStats {
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub by_status: StatusCounts,
  #[serde(default)]
  pub high_priority: u64,
  #[serde(default)]
  pub urgent_priority: u64,
}

impl TicketStats {
  /// Compute counts locally from a set of tickets.
  pub fn from_tickets(tickets: &[Ticket]) -> Self {
    let mut stats = TicketStats::default();
    for ticket in tickets {
      stats.total += 1;
      match ticket.status {
        TicketStatus::Open => stats.by_status.open += 1,
        TicketStatus::InProgress => stats.by_status.in_progress += 1,
        TicketStatus::Resolved => stats.by_status.resolved += 1,
        TicketStatus::Closed => stats.by_status.closed += 1,
      }
      match ticket.priority {
        Priority::High => stats.high_priority += 1,
        Priority::Urgent => stats.urgent_priority += 1,
        Priority::Low | Priority::Medium => {}
      }
    }
    stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entity_id_serializes_untagged() {
    let server: EntityId = serde_json::from_str("42").unwrap();
    assert_eq!(server, EntityId::Server(42));

    let local: EntityId = serde_json::from_str("\"local-abc\"").unwrap();
    assert!(local.is_local());
    assert_eq!(serde_json::to_string(&local).unwrap(), "\"local-abc\"");
  }

  #[test]
  fn test_entity_id_parse() {
    assert_eq!("17".parse::<EntityId>(), Ok(EntityId::Server(17)));
    assert!("local-x".parse::<EntityId>().unwrap().is_local());
    assert!("printer".parse::<EntityId>().is_err());
    assert!(EntityId::new_local().to_string().starts_with("local-"));
  }

  #[test]
  fn test_ticket_from_server_json() {
    let json = serde_json::json!({
      "id": 7,
      "employee": 3,
      "employee_name": "An Nguyen",
      "title": "VPN drops",
      "status": "in_progress",
      "priority": "high",
      "created_at": "2024-03-01T08:00:00+07:00",
      "updated_at": "2024-03-01T09:30:00.123456+07:00",
      "category": null,
      "latest_message": null,
      "unread_messages_count": 2
    });
    let ticket: Ticket = serde_json::from_value(json).unwrap();
    assert_eq!(ticket.id, EntityId::Server(7));
    assert_eq!(ticket.status, TicketStatus::InProgress);
    assert_eq!(ticket.priority, Priority::High);
    assert!(ticket.owned_by(3));
    assert!(!ticket.is_temporary);
    assert!(!ticket.from_fallback);
    assert_eq!(ticket.created_at.to_rfc3339(), "2024-03-01T01:00:00+00:00");
  }

  #[test]
  fn test_status_parse_accepts_dashes() {
    assert_eq!(
      "In-Progress".parse::<TicketStatus>(),
      Ok(TicketStatus::InProgress)
    );
    assert!("done".parse::<TicketStatus>().is_err());
  }

  #[test]
  fn test_stats_from_tickets() {
    let mut urgent = Ticket::placeholder(EntityId::Server(1));
    urgent.priority = Priority::Urgent;
    let mut closed = Ticket::placeholder(EntityId::Server(2));
    closed.status = TicketStatus::Closed;

    let stats = TicketStats::from_tickets(&[urgent, closed]);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.open, 1);
    assert_eq!(stats.by_status.closed, 1);
    assert_eq!(stats.urgent_priority, 1);
    assert_eq!(stats.high_priority, 0);
  }

  #[test]
  fn test_filter_matches_admin_criteria() {
    let mut ticket = Ticket::placeholder(EntityId::Server(4));
    ticket.title = "VPN drops every hour".to_string();
    ticket.description = "Since the router swap".to_string();
    ticket.priority = Priority::High;
    ticket.employee = Some(3);

    assert!(TicketFilter::default().matches(&ticket));
    assert!(TicketFilter::default().with_search("vpn").matches(&ticket));
    assert!(TicketFilter::default().with_search("ROUTER").matches(&ticket));
    assert!(!TicketFilter::default().with_search("printer").matches(&ticket));
    assert!(TicketFilter::default()
      .with_priority(Priority::High)
      .with_employee(3)
      .matches(&ticket));
    assert!(!TicketFilter::default().with_employee(4).matches(&ticket));
    assert!(!TicketFilter::status(TicketStatus::Closed).matches(&ticket));
  }

  #[test]
  fn test_filter_scoped_to_role() {
    let filter = TicketFilter::status(TicketStatus::Open)
      .with_priority(Priority::Urgent)
      .with_search("vpn");
    assert_eq!(filter.scoped(true), filter);
    assert_eq!(filter.scoped(false), TicketFilter::status(TicketStatus::Open));
    assert!(TicketFilter::default().with_search("  ").is_empty());
  }
}
