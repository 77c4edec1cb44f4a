//! SQLite-backed, generation-scoped response cache.
//!
//! This module provides the persistent Cache Store using SQLite with async
//! access via tokio-rusqlite. It supports:
//!
//! - Versioned generations, each owning a set of stored responses
//! - Request keys derived from method and canonical URL (SHA-256)
//! - Atomic install commits and activation cutover in single transactions
//! - A durable queue of pending form submissions outside any generation
//! - WAL mode so readers see either the old or the new value of an entry

pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod submissions;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::StoredResponse;
pub use generations::{Generation, GenerationState};
pub use hash::RequestKey;
pub use submissions::{NewSubmission, PendingSubmission};
