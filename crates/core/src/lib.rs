//! Core types and shared functionality for offcache.
//!
//! This crate provides:
//! - Generation-scoped cache store with SQLite backend
//! - Request/response descriptors exchanged with the host
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod http;

pub use cache::{CacheDb, Generation, GenerationState, RequestKey, StoredResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use http::{AcceptFamily, Headers, RequestDescriptor, RequestMode, ResponseDescriptor};
