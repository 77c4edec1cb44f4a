//! Generation lifecycle: install, activate, in-place update.
//!
//! The manager owns the active generation pointer ([`ActiveGeneration`]).
//! Strategies read it once per request; activation swaps it while holding the
//! write half of the lock across the store's cut-over transaction, so a
//! request never observes a generation that is still being promoted or one
//! that is mid-deletion.
//!
//! Transitions are serialized by a separate mutex: an `activate` issued while
//! an `install` is running waits for the install to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use offcache_core::cache::entries::is_storable_status;
use offcache_core::{CacheDb, Error, GenerationState, RequestDescriptor, StoredResponse};
use serde::Serialize;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::JoinSet;

use crate::classify::Classifier;
use crate::clients::ClientRegistry;
use crate::fetch::Network;

/// Shared handle to the id of the generation strategies read from.
///
/// Also tracks whether any network fetch has succeeded since the generation
/// was activated, which gates the cache-first fast path for static assets.
#[derive(Debug, Clone, Default)]
pub struct ActiveGeneration {
    id: Arc<RwLock<Option<String>>>,
    network_touched: Arc<AtomicBool>,
}

impl ActiveGeneration {
    pub fn new(id: Option<String>) -> Self {
        Self { id: Arc::new(RwLock::new(id)), network_touched: Arc::new(AtomicBool::new(false)) }
    }

    /// Id of the active generation. Waits while a cut-over is in progress.
    pub async fn current(&self) -> Option<String> {
        self.id.read().await.clone()
    }

    pub fn mark_network_activity(&self) {
        self.network_touched.store(true, Ordering::Release);
    }

    pub fn network_touched(&self) -> bool {
        self.network_touched.load(Ordering::Acquire)
    }

    pub(crate) async fn set(&self, id: Option<String>) {
        let mut pointer = self.id.write().await;
        *pointer = id;
        self.network_touched.store(false, Ordering::Release);
    }

    async fn lock_for_cutover(&self) -> RwLockWriteGuard<'_, Option<String>> {
        self.id.write().await
    }

    fn reset_network_activity(&self) {
        self.network_touched.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub generation_id: String,
    /// Entries written by the install (or present, when already active).
    pub entries: usize,
    /// The generation was already serving; nothing was fetched.
    pub already_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub generation_id: String,
    /// Generations deleted by the cut-over.
    pub removed: Vec<String>,
    pub notified_clients: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub generation_id: String,
    pub refreshed: usize,
    /// Manifest URLs whose refresh failed; their previous entries are kept.
    pub failed: Vec<String>,
}

/// Result of fetching one manifest path.
type Fetched = (usize, String, Result<StoredResponse, Error>);

pub struct GenerationLifecycleManager {
    store: CacheDb,
    network: Arc<dyn Network>,
    classifier: Arc<Classifier>,
    active: ActiveGeneration,
    clients: Arc<ClientRegistry>,
    manifest: Vec<String>,
    waiting: Mutex<Option<String>>,
    transition: tokio::sync::Mutex<()>,
}

impl GenerationLifecycleManager {
    pub fn new(
        store: CacheDb, network: Arc<dyn Network>, classifier: Arc<Classifier>, active: ActiveGeneration,
        clients: Arc<ClientRegistry>, manifest: Vec<String>,
    ) -> Self {
        Self {
            store,
            network,
            classifier,
            active,
            clients,
            manifest,
            waiting: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn active(&self) -> &ActiveGeneration {
        &self.active
    }

    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    /// Installed generation waiting for activation, if any.
    pub fn waiting(&self) -> Option<String> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_waiting(&self, id: Option<String>) {
        *self.waiting.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Load the active pointer and any waiting generation from the store.
    pub async fn restore(&self) -> Result<Option<String>, Error> {
        let _transition = self.transition.lock().await;
        let generations = self.store.list_generations().await?;

        let active = generations.iter().find(|g| g.state == GenerationState::Active).map(|g| g.id.clone());
        let waiting = generations
            .iter()
            .rev()
            .find(|g| g.state == GenerationState::Installed)
            .map(|g| g.id.clone());

        self.active.set(active.clone()).await;
        self.set_waiting(waiting);
        tracing::info!(active = ?active, waiting = ?self.waiting(), "restored generation pointer");
        Ok(active)
    }

    /// Create `generation_id` and pre-populate it with the whole manifest.
    ///
    /// All-or-nothing: the whole manifest is fetched before the store is
    /// touched, so a failed fetch returns `ManifestFetchFailure` and leaves
    /// both the active and any waiting generation as they were. A failed
    /// commit discards the new row.
    pub async fn install(&self, generation_id: &str) -> Result<InstallReport, Error> {
        let _transition = self.transition.lock().await;

        if self.active.current().await.as_deref() == Some(generation_id) {
            let entries = self.store.count_entries(generation_id).await? as usize;
            tracing::info!(generation = generation_id, "generation already active; skipping install");
            return Ok(InstallReport { generation_id: generation_id.to_string(), entries, already_active: true });
        }

        tracing::info!(generation = generation_id, manifest = self.manifest.len(), "installing generation");

        let mut entries = Vec::with_capacity(self.manifest.len());
        for (_, url, result) in self.fetch_all(&self.manifest).await {
            match result {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(generation = generation_id, url = %url, error = %e, "manifest fetch failed");
                    return Err(Error::ManifestFetchFailure { url, reason: e.to_string() });
                }
            }
        }

        self.store.create_generation(generation_id).await?;
        match self.store.commit_install(generation_id, entries).await {
            Ok(count) => {
                self.set_waiting(Some(generation_id.to_string()));
                tracing::info!(generation = generation_id, entries = count, "generation installed");
                Ok(InstallReport { generation_id: generation_id.to_string(), entries: count, already_active: false })
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete_generation(generation_id).await {
                    tracing::warn!(generation = generation_id, error = %cleanup, "failed to discard partial install");
                }
                if self.waiting().as_deref() == Some(generation_id) {
                    self.set_waiting(None);
                }
                tracing::warn!(generation = generation_id, error = %e, "install failed; previous generation kept");
                Err(e)
            }
        }
    }

    /// Make `generation_id` the sole active generation and notify clients.
    ///
    /// Every other generation is deleted before the pointer moves. Activating
    /// the generation that is already active only collects leftovers.
    pub async fn activate(&self, generation_id: &str) -> Result<ActivationReport, Error> {
        let _transition = self.transition.lock().await;

        let (removed, changed) = {
            let mut pointer = self.active.lock_for_cutover().await;
            let removed = self.store.activate_generation(generation_id).await?;
            let changed = pointer.as_deref() != Some(generation_id);
            *pointer = Some(generation_id.to_string());
            if changed {
                self.active.reset_network_activity();
            }
            (removed, changed)
        };

        if self.waiting().as_deref() == Some(generation_id) {
            self.set_waiting(None);
        }
        tracing::info!(generation = generation_id, removed = ?removed, "generation activated");

        let notified_clients = if changed { self.clients.notify_update(generation_id).await } else { 0 };
        Ok(ActivationReport { generation_id: generation_id.to_string(), removed, notified_clients })
    }

    /// Activate the waiting generation, if one exists.
    pub async fn activate_waiting(&self) -> Result<Option<ActivationReport>, Error> {
        match self.waiting() {
            Some(id) => self.activate(&id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Re-fetch the manifest into the active generation in place.
    ///
    /// Partial success is fine: entries whose fetch fails keep their previous
    /// contents.
    pub async fn update(&self) -> Result<UpdateReport, Error> {
        let _transition = self.transition.lock().await;
        let generation_id = self.active.current().await.ok_or(Error::NoActiveGeneration)?;

        let mut refreshed = 0;
        let mut failed = Vec::new();
        for (_, url, result) in self.fetch_all(&self.manifest).await {
            let written = match result {
                Ok(entry) => self.store.upsert_active_entry(&generation_id, &entry).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(true) => refreshed += 1,
                Ok(false) => {
                    tracing::warn!(generation = %generation_id, "generation retired during update");
                    failed.push(url);
                }
                Err(e) => {
                    tracing::warn!(generation = %generation_id, url = %url, error = %e, "update fetch failed");
                    failed.push(url);
                }
            }
        }

        tracing::info!(generation = %generation_id, refreshed, failed = failed.len(), "generation updated");
        Ok(UpdateReport { generation_id, refreshed, failed })
    }

    /// Add caller-supplied URLs to the active generation.
    ///
    /// All-or-nothing: nothing is written unless every URL fetches.
    pub async fn cache_urls(&self, urls: &[String]) -> Result<usize, Error> {
        if urls.is_empty() {
            return Err(Error::InvalidInput("no URLs to cache".into()));
        }
        let _transition = self.transition.lock().await;
        let generation_id = self.active.current().await.ok_or(Error::NoActiveGeneration)?;

        let mut entries = Vec::with_capacity(urls.len());
        for (_, url, result) in self.fetch_all(urls).await {
            match result {
                Ok(entry) => entries.push(entry),
                Err(e) => return Err(Error::ManifestFetchFailure { url, reason: e.to_string() }),
            }
        }

        let count = entries.len();
        for entry in &entries {
            if !self.store.upsert_active_entry(&generation_id, entry).await? {
                return Err(Error::GenerationState { id: generation_id, state: "retired".into() });
            }
        }
        tracing::info!(generation = %generation_id, count, "cached caller-supplied URLs");
        Ok(count)
    }

    /// Fetch every URL concurrently. Results come back in input order.
    async fn fetch_all(&self, urls: &[String]) -> Vec<Fetched> {
        let mut tasks = JoinSet::new();
        for (index, url) in urls.iter().enumerate() {
            let network = Arc::clone(&self.network);
            let classifier = Arc::clone(&self.classifier);
            let url = url.clone();
            tasks.spawn(async move {
                let result = fetch_entry(network.as_ref(), &classifier, &url).await;
                (index, url, result)
            });
        }

        let mut results = Vec::with_capacity(urls.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(fetched) => results.push(fetched),
                Err(e) => {
                    tracing::error!(error = %e, "manifest fetch task failed");
                    results.push((usize::MAX, "<task>".to_string(), Err(Error::NetworkUnavailable(e.to_string()))));
                }
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
    }
}

async fn fetch_entry(network: &dyn Network, classifier: &Classifier, url: &str) -> Result<StoredResponse, Error> {
    let canonical = classifier.canonical_url(url).ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    let request = RequestDescriptor::get(canonical.as_str());
    let key = classifier
        .request_key(&request)
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

    let response = network.fetch(&request).await?;
    if !is_storable_status(response.status) {
        return Err(Error::NetworkUnavailable(format!("HTTP {}", response.status)));
    }
    Ok(StoredResponse::from_response(&key, &response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LogNotifier;
    use crate::test_support::{MockNetwork, ORIGIN, test_config};
    use offcache_core::RequestKey;
    use std::time::Duration;

    const SHELL: &[&str] = &["/", "/main.css", "/main.js", "/offline.html"];

    struct Harness {
        store: CacheDb,
        network: Arc<MockNetwork>,
        manager: GenerationLifecycleManager,
    }

    async fn harness() -> Harness {
        let config = test_config();
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MockNetwork::new());
        for path in SHELL {
            network.respond(&format!("{ORIGIN}{path}"), 200, &format!("{path} v1"));
        }
        let clients = Arc::new(ClientRegistry::new(Arc::new(LogNotifier), Duration::from_secs(30)));
        let manager = GenerationLifecycleManager::new(
            store.clone(),
            network.clone(),
            Arc::new(Classifier::from_config(&config).unwrap()),
            ActiveGeneration::default(),
            clients,
            SHELL.iter().map(|p| p.to_string()).collect(),
        );
        Harness { store, network, manager }
    }

    fn key(path: &str) -> String {
        RequestKey::get(&format!("{ORIGIN}{path}")).hash
    }

    #[tokio::test]
    async fn test_install_then_activate_matches_manifest() {
        let h = harness().await;
        let report = h.manager.install("g1").await.unwrap();
        assert_eq!(report.entries, SHELL.len());
        assert_eq!(h.manager.waiting().as_deref(), Some("g1"));
        assert_eq!(h.manager.active().current().await, None);

        h.manager.activate("g1").await.unwrap();
        let generations = h.store.list_generations().await.unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].state, GenerationState::Active);

        let mut urls = h.store.list_entry_urls("g1").await.unwrap();
        urls.sort();
        let mut expected: Vec<String> = SHELL.iter().map(|p| format!("{ORIGIN}{p}")).collect();
        expected.sort();
        assert_eq!(urls, expected);
        assert_eq!(h.manager.waiting(), None);
    }

    #[tokio::test]
    async fn test_install_failure_leaves_nothing_and_keeps_active() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();

        h.network.fail(&format!("{ORIGIN}/main.js"));
        let result = h.manager.install("g2").await;
        assert!(matches!(result, Err(Error::ManifestFetchFailure { ref url, .. }) if url == "/main.js"));

        assert!(h.store.get_generation("g2").await.unwrap().is_none());
        assert_eq!(h.store.count_entries("g2").await.unwrap(), 0);
        assert_eq!(h.manager.active().current().await.as_deref(), Some("g1"));
        assert_eq!(h.store.count_entries("g1").await.unwrap(), SHELL.len() as u64);
        assert_eq!(h.manager.waiting(), None);
    }

    #[tokio::test]
    async fn test_failed_reinstall_keeps_waiting_generation() {
        let h = harness().await;
        h.manager.install("g2").await.unwrap();

        h.network.fail(&format!("{ORIGIN}/main.js"));
        assert!(matches!(h.manager.install("g2").await, Err(Error::ManifestFetchFailure { .. })));

        assert_eq!(h.manager.waiting().as_deref(), Some("g2"));
        let row = h.store.get_generation("g2").await.unwrap().unwrap();
        assert_eq!(row.state, GenerationState::Installed);
        assert_eq!(h.store.count_entries("g2").await.unwrap(), SHELL.len() as u64);

        let report = h.manager.activate_waiting().await.unwrap().unwrap();
        assert_eq!(report.generation_id, "g2");
        assert_eq!(h.manager.active().current().await.as_deref(), Some("g2"));
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let h = harness().await;
        h.network.respond(&format!("{ORIGIN}/main.css"), 404, "missing");
        assert!(matches!(h.manager.install("g1").await, Err(Error::ManifestFetchFailure { .. })));
        assert!(h.store.list_generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_deletes_previous_generation() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();

        h.network.respond(&format!("{ORIGIN}/main.css"), 200, "/main.css v2");
        h.manager.install("g2").await.unwrap();
        let report = h.manager.activate("g2").await.unwrap();

        assert_eq!(report.removed, vec!["g1".to_string()]);
        assert!(h.store.get_generation("g1").await.unwrap().is_none());
        assert_eq!(h.manager.active().current().await.as_deref(), Some("g2"));
        let entry = h.store.get_entry("g2", &key("/main.css")).await.unwrap().unwrap();
        assert_eq!(entry.body, b"/main.css v2");
    }

    #[tokio::test]
    async fn test_activate_unknown_generation_keeps_pointer() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();

        assert!(matches!(h.manager.activate("nope").await, Err(Error::GenerationNotFound(_))));
        assert_eq!(h.manager.active().current().await.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn test_install_of_active_generation_is_noop() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();
        let calls = h.network.call_count();

        let report = h.manager.install("g1").await.unwrap();
        assert!(report.already_active);
        assert_eq!(report.entries, SHELL.len());
        assert_eq!(h.network.call_count(), calls);
    }

    #[tokio::test]
    async fn test_activation_resets_network_activity() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.active().mark_network_activity();
        h.manager.activate("g1").await.unwrap();
        assert!(!h.manager.active().network_touched());
    }

    #[tokio::test]
    async fn test_reactivating_active_generation_does_not_notify() {
        let h = harness().await;
        h.manager.clients.register("tab").unwrap();
        h.manager.install("g1").await.unwrap();
        assert_eq!(h.manager.activate("g1").await.unwrap().notified_clients, 1);

        let again = h.manager.activate("g1").await.unwrap();
        assert_eq!(again.notified_clients, 0);
        assert!(again.removed.is_empty());
    }

    #[tokio::test]
    async fn test_update_partial_success_keeps_stale_entries() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();

        h.network.respond(&format!("{ORIGIN}/main.css"), 200, "/main.css v2");
        h.network.fail(&format!("{ORIGIN}/main.js"));
        let report = h.manager.update().await.unwrap();

        assert_eq!(report.generation_id, "g1");
        assert_eq!(report.refreshed, SHELL.len() - 1);
        assert_eq!(report.failed, vec!["/main.js".to_string()]);

        let css = h.store.get_entry("g1", &key("/main.css")).await.unwrap().unwrap();
        assert_eq!(css.body, b"/main.css v2");
        let js = h.store.get_entry("g1", &key("/main.js")).await.unwrap().unwrap();
        assert_eq!(js.body, b"/main.js v1");
    }

    #[tokio::test]
    async fn test_update_without_active_generation() {
        let h = harness().await;
        assert!(matches!(h.manager.update().await, Err(Error::NoActiveGeneration)));
    }

    #[tokio::test]
    async fn test_cache_urls_all_or_nothing() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();

        h.network.respond(&format!("{ORIGIN}/album/cover.jpg"), 200, "jpeg");
        h.network.fail(&format!("{ORIGIN}/album/back.jpg"));
        let urls = vec!["/album/cover.jpg".to_string(), "/album/back.jpg".to_string()];
        assert!(h.manager.cache_urls(&urls).await.is_err());
        assert!(h.store.get_entry("g1", &key("/album/cover.jpg")).await.unwrap().is_none());

        let count = h.manager.cache_urls(&urls[..1]).await.unwrap();
        assert_eq!(count, 1);
        assert!(h.store.get_entry("g1", &key("/album/cover.jpg")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_reads_store() {
        let h = harness().await;
        h.manager.install("g1").await.unwrap();
        h.manager.activate("g1").await.unwrap();
        h.manager.install("g2").await.unwrap();

        let fresh = GenerationLifecycleManager::new(
            h.store.clone(),
            h.network.clone(),
            Arc::new(Classifier::from_config(&test_config()).unwrap()),
            ActiveGeneration::default(),
            Arc::new(ClientRegistry::new(Arc::new(LogNotifier), Duration::from_secs(30))),
            Vec::new(),
        );
        assert_eq!(fresh.restore().await.unwrap().as_deref(), Some("g1"));
        assert_eq!(fresh.waiting().as_deref(), Some("g2"));
    }
}
