//! Client sessions and new-version notification.
//!
//! Activation flags every registered session with `update_available`. Nothing
//! is reloaded here: a session adopts the new version when its user accepts
//! the prompt, or, once the prompt times out, on its next navigation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offcache_core::Error;
use serde::{Deserialize, Serialize};

/// A user's answer to the update prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateResponse {
    /// Reload now into the new version.
    Reload,
    /// Keep working on the current version.
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSession {
    pub id: String,
    pub registered_at: DateTime<Utc>,
    pub update_available: bool,
    /// Generation announced by the most recent activation.
    pub available_generation: Option<String>,
    pub notified_at: Option<DateTime<Utc>>,
    /// The prompt expired unanswered; the session picks up the new version
    /// on its next navigation.
    pub reload_on_next_navigation: bool,
}

impl ClientSession {
    fn new(id: String) -> Self {
        Self {
            id,
            registered_at: Utc::now(),
            update_available: false,
            available_generation: None,
            notified_at: None,
            reload_on_next_navigation: false,
        }
    }
}

/// Outbound "new version ready" channel to client sessions.
#[async_trait]
pub trait ClientNotifier: Send + Sync {
    async fn notify(&self, session: &ClientSession, generation_id: &str);
}

/// Notifier that only logs. Hosts that poll `client_status` need nothing more.
pub struct LogNotifier;

#[async_trait]
impl ClientNotifier for LogNotifier {
    async fn notify(&self, session: &ClientSession, generation_id: &str) {
        tracing::info!(client = %session.id, generation = generation_id, "update available");
    }
}

pub struct ClientRegistry {
    sessions: Mutex<HashMap<String, ClientSession>>,
    notifier: Arc<dyn ClientNotifier>,
    prompt_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(notifier: Arc<dyn ClientNotifier>, prompt_timeout: Duration) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), notifier, prompt_timeout }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session. Registering an existing id returns it unchanged.
    pub fn register(&self, id: &str) -> Result<ClientSession, Error> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidInput("client id must not be empty".into()));
        }
        let mut sessions = self.sessions();
        let session = sessions.entry(id.to_string()).or_insert_with(|| ClientSession::new(id.to_string()));
        Ok(session.clone())
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.sessions().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Flag every session and send it a notification. Returns how many were
    /// notified.
    pub async fn notify_update(&self, generation_id: &str) -> usize {
        let now = Utc::now();
        let flagged: Vec<ClientSession> = {
            let mut sessions = self.sessions();
            sessions
                .values_mut()
                .map(|session| {
                    session.update_available = true;
                    session.available_generation = Some(generation_id.to_string());
                    session.notified_at = Some(now);
                    session.reload_on_next_navigation = false;
                    session.clone()
                })
                .collect()
        };

        for session in &flagged {
            self.notifier.notify(session, generation_id).await;
        }
        flagged.len()
    }

    /// Record the user's answer to the update prompt.
    pub fn acknowledge(&self, id: &str, response: UpdateResponse) -> Result<ClientSession, Error> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown client: {id}")))?;

        session.update_available = false;
        session.reload_on_next_navigation = false;
        match response {
            UpdateResponse::Reload => {
                tracing::info!(client = id, generation = ?session.available_generation, "client reloading");
                session.available_generation = None;
                session.notified_at = None;
            }
            UpdateResponse::Dismiss => {
                tracing::debug!(client = id, "update prompt dismissed");
            }
        }
        Ok(session.clone())
    }

    /// Current view of a session, expiring its prompt if it timed out.
    pub fn status(&self, id: &str) -> Option<ClientSession> {
        self.status_at(id, Utc::now())
    }

    pub fn status_at(&self, id: &str, now: DateTime<Utc>) -> Option<ClientSession> {
        let mut sessions = self.sessions();
        let session = sessions.get_mut(id)?;

        let timeout = chrono::Duration::from_std(self.prompt_timeout).unwrap_or(chrono::Duration::MAX);
        let expired = session
            .notified_at
            .is_some_and(|at| at.checked_add_signed(timeout).is_some_and(|deadline| deadline <= now));
        if session.update_available && expired {
            tracing::debug!(client = id, "update prompt timed out; reload deferred to next navigation");
            session.update_available = false;
            session.reload_on_next_navigation = true;
        }
        Some(session.clone())
    }

    /// Every session, sorted by id.
    pub fn list(&self) -> Vec<ClientSession> {
        let mut all: Vec<ClientSession> = self.sessions().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}
