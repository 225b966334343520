//! Support ticket client: transport, outbox, reconciliation and fallback
//! reads.

pub mod api_types;
pub mod client;
pub mod fallback;
pub mod outbox;
pub mod reconciler;
pub mod retry;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ApiRequest, HttpTransport, Method, Transport};
pub use fallback::FallbackResolver;
pub use outbox::{AttemptOutcome, EntryStatus, Outbox, OutboxEntry, OutboxPayload};
pub use reconciler::{Reconciler, SweepHandle, SweepReport, SyncEvent};
pub use retry::{with_retry, RetryPolicy};
pub use service::SupportService;
pub use types::{
  EntityId, Message, MessageDraft, Priority, Ticket, TicketDraft, TicketFilter, TicketStats, TicketStatus,
};
