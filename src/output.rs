//! Plain-text rendering of service results for the terminal.

use chrono::{DateTime, Local, Utc};
use std::fmt::Write;

use helpline::cache::{Provenance, Resolved};
use helpline::support::{
  EntryStatus, Message, OutboxEntry, OutboxPayload, SweepReport, SyncEvent, Ticket, TicketStats,
};

fn local_time(at: DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn truncate(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
  }
}

/// Banner explaining where the data came from, if not live.
pub fn provenance_note<T>(resolved: &Resolved<T>) -> Option<String> {
  let reason = resolved
    .failure
    .as_ref()
    .map(|f| f.user_message())
    .unwrap_or_default();
  match resolved.provenance {
    Provenance::Live => None,
    Provenance::Cache => {
      let when = resolved.cached_at.map(local_time).unwrap_or_else(|| "earlier".to_string());
      Some(format!("[saved data from {}] {}", when, reason).trim_end().to_string())
    }
    Provenance::EmptyFallback => Some(format!("[no saved data] {}", reason).trim_end().to_string()),
  }
}

fn ticket_marker(ticket: &Ticket) -> &'static str {
  if ticket.is_temporary {
    " (sending)"
  } else if ticket.unavailable {
    " (unavailable)"
  } else {
    ""
  }
}

pub fn format_ticket_list(resolved: &Resolved<Vec<Ticket>>) -> String {
  let mut out = String::new();
  if let Some(note) = provenance_note(resolved) {
    let _ = writeln!(out, "{}", note);
  }
  if resolved.data.is_empty() {
    let _ = writeln!(out, "No tickets.");
    return out;
  }

  let _ = writeln!(out, "{:<44} {:<12} {:<8} {}", "ID", "STATUS", "PRIORITY", "TITLE");
  for ticket in &resolved.data {
    let _ = writeln!(
      out,
      "{:<44} {:<12} {:<8} {}{}",
      ticket.id.to_string(),
      ticket.status.as_str(),
      ticket.priority.as_str(),
      truncate(&ticket.title, 50),
      ticket_marker(ticket)
    );
  }
  out
}

pub fn format_ticket(resolved: &Resolved<Ticket>) -> String {
  let ticket = &resolved.data;
  let mut out = String::new();
  if let Some(note) = provenance_note(resolved) {
    let _ = writeln!(out, "{}", note);
  }
  let _ = writeln!(out, "#{} {}{}", ticket.id, ticket.title, ticket_marker(ticket));
  if ticket.unavailable {
    return out;
  }
  let _ = writeln!(
    out,
    "status: {}  priority: {}  opened: {}",
    ticket.status,
    ticket.priority,
    local_time(ticket.created_at)
  );
  if let Some(category) = &ticket.category {
    let _ = writeln!(out, "category: {}", category);
  }
  if let Some(name) = &ticket.employee_name {
    let _ = writeln!(out, "employee: {}", name);
  }
  if !ticket.description.is_empty() {
    let _ = writeln!(out, "\n{}", ticket.description);
  }
  out
}

pub fn format_messages(resolved: &Resolved<Vec<Message>>) -> String {
  let mut out = String::new();
  if let Some(note) = provenance_note(resolved) {
    let _ = writeln!(out, "{}", note);
  }
  if resolved.data.is_empty() {
    let _ = writeln!(out, "No messages yet.");
    return out;
  }
  for message in &resolved.data {
    let who = match (&message.sender_name, message.is_from_admin) {
      (Some(name), _) if !name.is_empty() => name.clone(),
      (_, true) => "Support".to_string(),
      _ => "You".to_string(),
    };
    let state = if message.is_temporary { " (sending)" } else { "" };
    let _ = writeln!(
      out,
      "[{}] {}{}: {}",
      local_time(message.created_at),
      who,
      state,
      message.content
    );
  }
  out
}

pub fn format_pending(entries: &[OutboxEntry], cap: u32) -> String {
  if entries.is_empty() {
    return "Nothing waiting to be sent.\n".to_string();
  }

  let mut out = String::new();
  for entry in entries {
    let what = match &entry.payload {
      OutboxPayload::CreateTicket(t) => format!("new ticket \"{}\"", truncate(&t.title, 40)),
      OutboxPayload::SendMessage(m) => format!("message to #{}: {}", m.ticket, truncate(&m.content, 40)),
    };
    let state = if entry.is_exhausted(cap) {
      "gave up, retry manually".to_string()
    } else if !entry.retryable {
      "rejected by server, retry manually".to_string()
    } else {
      match entry.status {
        EntryStatus::Pending => "waiting".to_string(),
        EntryStatus::Sending => "sending".to_string(),
        EntryStatus::Failed => format!("failed {}/{}", entry.attempts, cap),
      }
    };
    let _ = writeln!(out, "{}  {}  [{}]", entry.local_id, what, state);
    if let Some(error) = &entry.last_error {
      let _ = writeln!(out, "    last error: {}", error);
    }
  }
  out
}

pub fn format_report(report: &SweepReport) -> String {
  if report.skipped {
    return "A sync is already running; try again in a moment.".to_string();
  }
  format!(
    "{} queued, {} sent, {} still pending",
    report.total, report.sent, report.pending
  )
}

pub fn format_event(event: &SyncEvent) -> Option<String> {
  match event {
    SyncEvent::TicketConfirmed { local_id, ticket } => {
      Some(format!("ticket {} saved as #{}", local_id, ticket.id))
    }
    SyncEvent::MessageConfirmed { message, .. } => {
      Some(format!("message delivered to #{}", message.ticket))
    }
    SyncEvent::EntryFailed {
      local_id,
      error,
      exhausted,
      ..
    } => Some(if *exhausted {
      format!("{} could not be sent; retry it manually ({})", local_id, error.user_message())
    } else {
      format!("{} not sent yet: {}", local_id, error.user_message())
    }),
    SyncEvent::SweepFinished(report) if report.total > 0 => Some(format_report(report)),
    SyncEvent::SweepFinished(_) => None,
  }
}

pub fn format_stats(resolved: &Resolved<TicketStats>) -> String {
  let stats = &resolved.data;
  let mut out = String::new();
  if let Some(note) = provenance_note(resolved) {
    let _ = writeln!(out, "{}", note);
  }
  let _ = writeln!(out, "total:        {}", stats.total);
  let _ = writeln!(out, "open:         {}", stats.by_status.open);
  let _ = writeln!(out, "in progress:  {}", stats.by_status.in_progress);
  let _ = writeln!(out, "resolved:     {}", stats.by_status.resolved);
  let _ = writeln!(out, "closed:       {}", stats.by_status.closed);
  let _ = writeln!(out, "high:         {}", stats.high_priority);
  let _ = writeln!(out, "urgent:       {}", stats.urgent_priority);
  out
}
