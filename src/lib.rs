//! Offline-tolerant client core for support tickets.
//!
//! Reads resolve through the server, then the local cache, then a
//! placeholder. Writes go through a durable outbox that is drained in the
//! background.

pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod support;

pub use error::{StoreError, SupportError, TransportFailure};
pub use session::{Role, Session};
pub use support::SupportService;
