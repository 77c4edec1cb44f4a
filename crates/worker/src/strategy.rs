//! Caching strategies.
//!
//! - `Excluded`: network only. The cache is never read or written, and a
//!   failure goes back to the caller.
//! - `NavigationDocument`: network first under a timeout, with the response
//!   written through before it is returned. On failure the stored copy is
//!   served, then the offline document.
//! - `StaticAsset`: stale-while-revalidate. A hit is returned immediately;
//!   once the network has been seen since activation, a background refresh is
//!   spawned as well. Until then hits are served cache-first without touching
//!   the network. Misses go to the network and are stored.
//!
//! Store failures never fail a request: reads count as misses and writes are
//! skipped with a warning.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use offcache_core::cache::entries::is_storable_status;
use offcache_core::{CacheDb, Error, RequestDescriptor, RequestKey, ResponseDescriptor, StoredResponse};
use tokio::task::JoinHandle;

use crate::classify::{CacheabilityLabel, Classifier};
use crate::fallback::FallbackResolver;
use crate::fetch::Network;
use crate::lifecycle::ActiveGeneration;

/// What a background revalidation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// The stored entry was overwritten with a fresh response.
    Refreshed,
    /// The origin answered 304 Not Modified.
    Unchanged,
    /// The response was not storable and the entry was left alone.
    Skipped { status: u16 },
    Failed(String),
    /// The generation was replaced before the write landed.
    GenerationRetired,
}

pub struct StrategyExecutor {
    store: CacheDb,
    network: Arc<dyn Network>,
    classifier: Arc<Classifier>,
    active: ActiveGeneration,
    fallback: Arc<FallbackResolver>,
    navigation_timeout: Duration,
    revalidations: Mutex<Vec<JoinHandle<RevalidationOutcome>>>,
}

impl StrategyExecutor {
    pub fn new(
        store: CacheDb, network: Arc<dyn Network>, classifier: Arc<Classifier>, active: ActiveGeneration,
        fallback: Arc<FallbackResolver>, navigation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            network,
            classifier,
            active,
            fallback,
            navigation_timeout,
            revalidations: Mutex::new(Vec::new()),
        }
    }

    /// Run the strategy for `label`.
    ///
    /// Only `Excluded` requests can fail; cacheable labels always resolve to a
    /// response, degraded through the fallback resolver if need be.
    pub async fn execute(
        &self, request: &RequestDescriptor, label: CacheabilityLabel,
    ) -> Result<ResponseDescriptor, Error> {
        match label {
            CacheabilityLabel::Excluded => self.fetch(request).await,
            CacheabilityLabel::NavigationDocument => Ok(self.network_first(request).await),
            CacheabilityLabel::StaticAsset => Ok(self.stale_while_revalidate(request).await),
        }
    }

    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, Error> {
        let response = self.network.fetch(request).await?;
        self.active.mark_network_activity();
        Ok(response)
    }

    async fn network_first(&self, request: &RequestDescriptor) -> ResponseDescriptor {
        let generation = self.active.current().await;
        let key = self.classifier.request_key(request);

        let reason = match tokio::time::timeout(self.navigation_timeout, self.fetch(request)).await {
            Ok(Ok(response)) => {
                if let (Some(generation), Some(key)) = (&generation, &key)
                    && is_storable_status(response.status)
                {
                    self.write(generation, key, &response).await;
                }
                return response;
            }
            Ok(Err(e)) => e,
            Err(_) => Error::FetchTimeout(format!("{} after {}ms", request.url, self.navigation_timeout.as_millis())),
        };

        tracing::debug!(url = %request.url, reason = %reason, "navigation fetch failed; trying cache");
        if let (Some(generation), Some(key)) = (&generation, &key)
            && let Some(entry) = self.lookup(generation, key).await
        {
            return entry.to_response();
        }
        self.fallback.resolve(request, &reason).await
    }

    async fn stale_while_revalidate(&self, request: &RequestDescriptor) -> ResponseDescriptor {
        let generation = self.active.current().await;
        let key = self.classifier.request_key(request);

        if let (Some(generation), Some(key)) = (&generation, &key)
            && let Some(entry) = self.lookup(generation, key).await
        {
            if self.active.network_touched() {
                self.spawn_revalidation(generation.clone(), key.clone(), request.clone(), &entry);
            } else {
                tracing::debug!(url = %request.url, "cache-first hit; network not seen since activation");
            }
            return entry.to_response();
        }

        tracing::debug!(url = %request.url, "cache miss");
        match self.fetch(request).await {
            Ok(response) => {
                if let (Some(generation), Some(key)) = (&generation, &key)
                    && is_storable_status(response.status)
                {
                    self.write(generation, key, &response).await;
                }
                response
            }
            Err(e) => self.fallback.resolve(request, &e).await,
        }
    }

    async fn lookup(&self, generation: &str, key: &RequestKey) -> Option<StoredResponse> {
        match self.store.get_entry(generation, &key.hash).await {
            Ok(Some(entry)) => {
                tracing::debug!(url = %key.url, generation, "cache hit");
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(url = %key.url, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn write(&self, generation: &str, key: &RequestKey, response: &ResponseDescriptor) {
        let entry = StoredResponse::from_response(key, response);
        match self.store.upsert_active_entry(generation, &entry).await {
            Ok(true) => tracing::debug!(url = %key.url, generation, "stored response"),
            Ok(false) => tracing::debug!(url = %key.url, generation, "generation retired; write skipped"),
            Err(e) => tracing::warn!(url = %key.url, error = %e, "cache write failed; skipped"),
        }
    }

    fn spawn_revalidation(
        &self, generation: String, key: RequestKey, request: RequestDescriptor, stale: &StoredResponse,
    ) {
        let store = self.store.clone();
        let network = Arc::clone(&self.network);
        let active = self.active.clone();
        let request = match stale.headers.get("etag") {
            Some(etag) => request.with_header("if-none-match", etag.clone()),
            None => request,
        };

        let handle = tokio::spawn(async move {
            let outcome = revalidate(&store, network.as_ref(), &active, &generation, &key, &request).await;
            match &outcome {
                RevalidationOutcome::Failed(reason) => {
                    tracing::warn!(url = %key.url, reason = %reason, "revalidation failed")
                }
                other => tracing::debug!(url = %key.url, outcome = ?other, "revalidated"),
            }
            outcome
        });

        let mut pending = self.revalidations.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Background revalidations not yet finished.
    pub fn pending_revalidations(&self) -> usize {
        let pending = self.revalidations.lock().unwrap_or_else(PoisonError::into_inner);
        pending.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every background revalidation spawned so far.
    pub async fn drain_revalidations(&self) -> Vec<RevalidationOutcome> {
        let handles = std::mem::take(&mut *self.revalidations.lock().unwrap_or_else(PoisonError::into_inner));
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.unwrap_or_else(|e| RevalidationOutcome::Failed(e.to_string())));
        }
        outcomes
    }
}

async fn revalidate(
    store: &CacheDb, network: &dyn Network, active: &ActiveGeneration, generation: &str, key: &RequestKey,
    request: &RequestDescriptor,
) -> RevalidationOutcome {
    let response = match network.fetch(request).await {
        Ok(response) => response,
        Err(e) => return RevalidationOutcome::Failed(e.to_string()),
    };
    active.mark_network_activity();

    if response.status == 304 {
        return RevalidationOutcome::Unchanged;
    }
    if !is_storable_status(response.status) {
        return RevalidationOutcome::Skipped { status: response.status };
    }

    match store.upsert_active_entry(generation, &StoredResponse::from_response(key, &response)).await {
        Ok(true) => RevalidationOutcome::Refreshed,
        Ok(false) => RevalidationOutcome::GenerationRetired,
        Err(e) => RevalidationOutcome::Failed(e.to_string()),
    }
}
