//! Offline cache worker for offcache.
//!
//! This crate provides:
//! - Request classification into caching strategies
//! - Stale-while-revalidate and network-first strategy execution
//! - Generation install/activate/update transitions
//! - Fallback responses and offline form queueing
//! - Host event dispatch through [`OfflineWorker`]

pub mod classify;
pub mod clients;
pub mod dispatch;
pub mod fallback;
pub mod fetch;
pub mod gateway;
pub mod lifecycle;
pub mod strategy;
pub mod submissions;

#[cfg(test)]
pub(crate) mod test_support;

pub use classify::{CacheabilityLabel, Classifier};
pub use clients::{ClientNotifier, ClientRegistry, ClientSession, LogNotifier, UpdateResponse};
pub use dispatch::{
    CacheStatus, GenerationStatus, HostMessage, InstallOutcome, MessageReply, OfflineWorker, SYNC_SUBMIT_FORMS,
    SYNC_UPDATE_CONTENT, SyncReport,
};
pub use fallback::{FallbackKind, FallbackResolver};
pub use fetch::{FetchClient, FetchConfig, Network};
pub use gateway::Gateway;
pub use lifecycle::{ActivationReport, ActiveGeneration, GenerationLifecycleManager, InstallReport, UpdateReport};
pub use strategy::{RevalidationOutcome, StrategyExecutor};
pub use submissions::{ReplayReport, SubmissionReplayer};
