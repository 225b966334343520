//! Durable local cache of tickets and message threads.
//!
//! This module provides:
//! - A string-keyed store of JSON values (SQLite or in-memory)
//! - Tagged cache records carrying their provenance
//! - Read-modify-write helpers for the ticket list and threads

mod layer;
mod storage;
mod traits;

pub use layer::TicketCache;
pub use storage::{KvStore, MemoryStore, SqliteStore};
pub use traits::{upsert, CacheEntry, CacheKey, CacheRecord, Cacheable, Cached, Provenance, Resolved};
