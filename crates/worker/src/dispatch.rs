//! Host-facing event dispatcher.
//!
//! [`OfflineWorker`] wires the components together and exposes one async
//! method per lifecycle event the host delivers: `fetch`, `install`,
//! `activate`, `message`, `sync`, `periodicsync`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use offcache_core::{AppConfig, CacheDb, Error, RequestDescriptor, ResponseDescriptor};
use serde::{Deserialize, Serialize};

use crate::classify::Classifier;
use crate::clients::{ClientNotifier, ClientRegistry, LogNotifier};
use crate::fallback::FallbackResolver;
use crate::fetch::{FetchClient, FetchConfig, Network};
use crate::gateway::Gateway;
use crate::lifecycle::{ActivationReport, ActiveGeneration, GenerationLifecycleManager, InstallReport, UpdateReport};
use crate::strategy::{RevalidationOutcome, StrategyExecutor};
use crate::submissions::{ReplayReport, SubmissionReplayer};

/// Sync tag that replays queued form submissions.
pub const SYNC_SUBMIT_FORMS: &str = "submit-forms";
/// Sync tag that refreshes the app shell in place.
pub const SYNC_UPDATE_CONTENT: &str = "update-content";

/// Commands posted by the hosting page.
///
/// The wire form is either a bare string (`"SKIP_WAITING"`) or an object
/// tagged by `type` (`{"type": "CACHE_URLS", "urls": [...]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    SkipWaiting,
    UpdateCache,
    CacheUrls { urls: Vec<String> },
}

impl FromStr for HostMessage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.trim_matches('"') {
            "SKIP_WAITING" => return Ok(Self::SkipWaiting),
            "UPDATE_CACHE" => return Ok(Self::UpdateCache),
            _ => {}
        }
        serde_json::from_str(trimmed).map_err(|e| Error::InvalidInput(format!("unrecognized message: {e}")))
    }
}

impl fmt::Display for HostMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipWaiting => f.write_str("SKIP_WAITING"),
            Self::UpdateCache => f.write_str("UPDATE_CACHE"),
            Self::CacheUrls { urls } => write!(f, "CACHE_URLS({})", urls.len()),
        }
    }
}

/// Reply posted back for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageReply {
    fn from_result<T>(result: Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self { success: true, error: None },
            Err(e) => Self { success: false, error: Some(e.to_string()) },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub install: InstallReport,
    /// Present when the new generation was activated right away.
    pub activation: Option<ActivationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum SyncReport {
    SubmitForms(ReplayReport),
    UpdateContent(UpdateReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationStatus {
    pub id: String,
    pub state: String,
    pub created_at: String,
    pub activated_at: Option<String>,
    pub entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    /// Generation id the current configuration installs.
    pub configured_generation: String,
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub generations: Vec<GenerationStatus>,
    pub pending_submissions: u64,
    pub pending_revalidations: usize,
    pub network_seen: bool,
    pub clients: usize,
}

/// The offline cache worker.
pub struct OfflineWorker {
    config: AppConfig,
    store: CacheDb,
    lifecycle: Arc<GenerationLifecycleManager>,
    executor: Arc<StrategyExecutor>,
    gateway: Gateway,
    replayer: SubmissionReplayer,
    clients: Arc<ClientRegistry>,
}

impl OfflineWorker {
    /// Assemble a worker over an opened store and a network.
    pub fn new(
        config: AppConfig, store: CacheDb, network: Arc<dyn Network>, notifier: Arc<dyn ClientNotifier>,
    ) -> Result<Self, Error> {
        let classifier = Arc::new(Classifier::from_config(&config)?);
        let active = ActiveGeneration::default();
        let clients = Arc::new(ClientRegistry::new(notifier, config.update_prompt_timeout()));

        let fallback = Arc::new(FallbackResolver::new(
            store.clone(),
            active.clone(),
            Arc::clone(&classifier),
            config.offline_document.clone(),
            config.placeholder_image.clone(),
            config.retry_after_secs,
        ));
        let executor = Arc::new(StrategyExecutor::new(
            store.clone(),
            Arc::clone(&network),
            Arc::clone(&classifier),
            active.clone(),
            Arc::clone(&fallback),
            config.navigation_timeout(),
        ));
        let lifecycle = Arc::new(GenerationLifecycleManager::new(
            store.clone(),
            Arc::clone(&network),
            Arc::clone(&classifier),
            active,
            Arc::clone(&clients),
            config.install_manifest(),
        ));
        let gateway = Gateway::new(
            classifier,
            Arc::clone(&executor),
            fallback,
            store.clone(),
            config.form_endpoints.clone(),
        );
        let replayer = SubmissionReplayer::new(store.clone(), network);

        Ok(Self { config, store, lifecycle, executor, gateway, replayer, clients })
    }

    /// Open the configured store, build the HTTP client and restore the
    /// active generation from disk.
    pub async fn start(config: AppConfig) -> Result<Self, Error> {
        let store = CacheDb::open(&config.db_path).await?;
        let network = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
        let worker = Self::new(config, store, network, Arc::new(LogNotifier))?;
        worker.lifecycle.restore().await?;
        Ok(worker)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn lifecycle(&self) -> &GenerationLifecycleManager {
        &self.lifecycle
    }

    /// `fetch` event.
    pub async fn on_fetch(&self, request: RequestDescriptor) -> ResponseDescriptor {
        self.gateway.handle(request).await
    }

    /// `install` event: pre-cache the configured generation, and activate it
    /// straight away when `skip_waiting` is set.
    pub async fn on_install(&self) -> Result<InstallOutcome, Error> {
        let generation_id = self.config.generation_id();
        let install = self.lifecycle.install(&generation_id).await?;

        let activation = if self.config.skip_waiting && !install.already_active {
            Some(self.lifecycle.activate(&generation_id).await?)
        } else {
            None
        };
        Ok(InstallOutcome { install, activation })
    }

    /// `activate` event: promote the waiting generation, or re-assert the
    /// configured one when nothing is waiting.
    pub async fn on_activate(&self) -> Result<ActivationReport, Error> {
        let generation_id = self.lifecycle.waiting().unwrap_or_else(|| self.config.generation_id());
        self.lifecycle.activate(&generation_id).await
    }

    /// `message` event.
    pub async fn on_message(&self, message: HostMessage) -> MessageReply {
        tracing::debug!(message = %message, "host message");
        let reply = match message {
            HostMessage::SkipWaiting => MessageReply::from_result(self.lifecycle.activate_waiting().await),
            HostMessage::UpdateCache => MessageReply::from_result(self.lifecycle.update().await),
            HostMessage::CacheUrls { urls } => MessageReply::from_result(self.lifecycle.cache_urls(&urls).await),
        };
        if let Some(error) = &reply.error {
            tracing::warn!(error = %error, "message handling failed");
        }
        reply
    }

    /// `sync` event.
    pub async fn on_sync(&self, tag: &str) -> Result<SyncReport, Error> {
        match tag {
            SYNC_SUBMIT_FORMS => self.replayer.replay().await.map(SyncReport::SubmitForms),
            SYNC_UPDATE_CONTENT => self.lifecycle.update().await.map(SyncReport::UpdateContent),
            other => Err(Error::InvalidInput(format!("unknown sync tag: {other}"))),
        }
    }

    /// `periodicsync` event. Only content refresh is scheduled periodically.
    pub async fn on_periodic_sync(&self, tag: &str) -> Result<UpdateReport, Error> {
        if tag != SYNC_UPDATE_CONTENT {
            return Err(Error::InvalidInput(format!("unknown periodic sync tag: {tag}")));
        }
        self.lifecycle.update().await
    }

    /// Wait for outstanding background revalidations.
    pub async fn drain_revalidations(&self) -> Vec<RevalidationOutcome> {
        self.executor.drain_revalidations().await
    }

    /// Let background revalidations finish, then close the store.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let outcomes = self.executor.drain_revalidations().await;
        tracing::info!(revalidations = outcomes.len(), "closing cache store");
        self.store.clone().close().await
    }

    /// Snapshot of generations, queue depth and client count.
    pub async fn status(&self) -> Result<CacheStatus, Error> {
        let mut generations = Vec::new();
        for generation in self.store.list_generations().await? {
            let entries = self.store.count_entries(&generation.id).await?;
            generations.push(GenerationStatus {
                state: generation.state.to_string(),
                id: generation.id,
                created_at: generation.created_at,
                activated_at: generation.activated_at,
                entries,
            });
        }

        Ok(CacheStatus {
            configured_generation: self.config.generation_id(),
            active: self.lifecycle.active().current().await,
            waiting: self.lifecycle.waiting(),
            generations,
            pending_submissions: self.store.count_pending_submissions().await?,
            pending_revalidations: self.executor.pending_revalidations(),
            network_seen: self.lifecycle.active().network_touched(),
            clients: self.clients.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockNetwork, ORIGIN, test_config};

    const SHELL: &[&str] = &["/", "/main.css", "/main.js", "/offline.html", "/assets/images/placeholder.svg"];

    fn serve_shell(network: &MockNetwork, version: &str) {
        for path in SHELL {
            network.respond(&format!("{ORIGIN}{path}"), 200, &format!("{path} {version}"));
        }
    }

    async fn worker(config: AppConfig) -> (OfflineWorker, Arc<MockNetwork>) {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MockNetwork::new());
        let worker = OfflineWorker::new(config, store, network.clone(), Arc::new(LogNotifier)).unwrap();
        (worker, network)
    }

    fn shell_config(version: &str) -> AppConfig {
        AppConfig {
            app_version: version.into(),
            manifest: vec!["/".into(), "/main.css".into(), "/main.js".into()],
            ..test_config()
        }
    }

    #[test]
    fn test_host_message_parsing() {
        assert_eq!("SKIP_WAITING".parse::<HostMessage>().unwrap(), HostMessage::SkipWaiting);
        assert_eq!("\"UPDATE_CACHE\"".parse::<HostMessage>().unwrap(), HostMessage::UpdateCache);
        let message: HostMessage = r#"{"type":"CACHE_URLS","urls":["/a.css"]}"#.parse().unwrap();
        assert_eq!(message, HostMessage::CacheUrls { urls: vec!["/a.css".into()] });
        assert!("REBOOT".parse::<HostMessage>().is_err());
    }

    #[test]
    fn test_message_reply_serialization() {
        let ok = serde_json::to_value(MessageReply { success: true, error: None }).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true}));
    }

    #[tokio::test]
    async fn test_install_auto_activates_with_skip_waiting() {
        let (worker, network) = worker(shell_config("1.0.0")).await;
        serve_shell(&network, "v1");

        let outcome = worker.on_install().await.unwrap();
        assert_eq!(outcome.install.entries, SHELL.len());
        let activation = outcome.activation.unwrap();
        assert_eq!(activation.generation_id, "epk-shell-v1.0.0");

        let status = worker.status().await.unwrap();
        assert_eq!(status.active.as_deref(), Some("epk-shell-v1.0.0"));
        assert_eq!(status.generations.len(), 1);
        assert_eq!(status.generations[0].entries, SHELL.len() as u64);
    }

    #[tokio::test]
    async fn test_install_waits_without_skip_waiting() {
        let config = AppConfig { skip_waiting: false, ..shell_config("1.0.0") };
        let (worker, network) = worker(config).await;
        serve_shell(&network, "v1");

        let outcome = worker.on_install().await.unwrap();
        assert!(outcome.activation.is_none());
        assert_eq!(worker.lifecycle().waiting().as_deref(), Some("epk-shell-v1.0.0"));

        let reply = worker.on_message(HostMessage::SkipWaiting).await;
        assert!(reply.success);
        assert_eq!(worker.status().await.unwrap().active.as_deref(), Some("epk-shell-v1.0.0"));
    }

    #[tokio::test]
    async fn test_redeploy_serves_only_new_generation() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MockNetwork::new());
        serve_shell(&network, "v1");
        let old = OfflineWorker::new(shell_config("1.0.0"), store.clone(), network.clone(), Arc::new(LogNotifier))
            .unwrap();
        old.on_install().await.unwrap();

        serve_shell(&network, "v2");
        let new = OfflineWorker::new(shell_config("2.0.0"), store.clone(), network.clone(), Arc::new(LogNotifier))
            .unwrap();
        new.lifecycle().restore().await.unwrap();
        let outcome = new.on_install().await.unwrap();
        assert_eq!(outcome.activation.unwrap().removed, vec!["epk-shell-v1.0.0".to_string()]);

        network.set_offline(true);
        let response = new.on_fetch(RequestDescriptor::get("/main.css")).await;
        assert_eq!(response.body, b"/main.css v2");
        assert_eq!(store.list_generations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_generation_serving() {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MockNetwork::new());
        serve_shell(&network, "v1");
        let old = OfflineWorker::new(shell_config("1.0.0"), store.clone(), network.clone(), Arc::new(LogNotifier))
            .unwrap();
        old.on_install().await.unwrap();

        network.fail(&format!("{ORIGIN}/main.js"));
        let new = OfflineWorker::new(shell_config("2.0.0"), store.clone(), network.clone(), Arc::new(LogNotifier))
            .unwrap();
        new.lifecycle().restore().await.unwrap();
        assert!(matches!(new.on_install().await, Err(Error::ManifestFetchFailure { .. })));

        let status = new.status().await.unwrap();
        assert_eq!(status.active.as_deref(), Some("epk-shell-v1.0.0"));
        assert_eq!(status.generations.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_tags() {
        let (worker, network) = worker(shell_config("1.0.0")).await;
        serve_shell(&network, "v1");
        worker.on_install().await.unwrap();

        let report = worker.on_sync(SYNC_SUBMIT_FORMS).await.unwrap();
        assert_eq!(report, SyncReport::SubmitForms(ReplayReport::default()));

        serve_shell(&network, "v1.1");
        match worker.on_sync(SYNC_UPDATE_CONTENT).await.unwrap() {
            SyncReport::UpdateContent(update) => assert_eq!(update.refreshed, SHELL.len()),
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(worker.on_sync("push-later").await.is_err());
        assert!(worker.on_periodic_sync(SYNC_UPDATE_CONTENT).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_form_then_sync_replays() {
        let (worker, network) = worker(shell_config("1.0.0")).await;
        serve_shell(&network, "v1");
        worker.on_install().await.unwrap();

        network.set_offline(true);
        let request = RequestDescriptor::new("POST", "/api/collaborations").with_body("{\"name\":\"Luz\"}");
        assert_eq!(worker.on_fetch(request).await.status, 202);
        assert_eq!(worker.status().await.unwrap().pending_submissions, 1);

        network.set_offline(false);
        network.respond(&format!("{ORIGIN}/api/collaborations"), 200, r#"{"success":true}"#);
        match worker.on_sync(SYNC_SUBMIT_FORMS).await.unwrap() {
            SyncReport::SubmitForms(report) => assert_eq!(report.delivered, 1),
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(worker.status().await.unwrap().pending_submissions, 0);
    }

    #[tokio::test]
    async fn test_activation_notifies_clients() {
        let (worker, network) = worker(shell_config("1.0.0")).await;
        serve_shell(&network, "v1");
        worker.clients().register("tab-1").unwrap();

        let outcome = worker.on_install().await.unwrap();
        assert_eq!(outcome.activation.unwrap().notified_clients, 1);
        assert!(worker.clients().status("tab-1").unwrap().update_available);
    }

    #[tokio::test]
    async fn test_cache_urls_message_reply() {
        let (worker, network) = worker(shell_config("1.0.0")).await;
        serve_shell(&network, "v1");
        worker.on_install().await.unwrap();

        network.respond(&format!("{ORIGIN}/session/01.jpg"), 200, "jpeg");
        let reply = worker.on_message(HostMessage::CacheUrls { urls: vec!["/session/01.jpg".into()] }).await;
        assert_eq!(reply, MessageReply { success: true, error: None });

        let reply = worker.on_message(HostMessage::CacheUrls { urls: vec!["/session/02.jpg".into()] }).await;
        assert!(!reply.success);
        assert!(reply.error.unwrap().starts_with("MANIFEST_FETCH_FAILED"));
    }
}
