//! Replay of form submissions queued while offline.

use std::sync::Arc;

use offcache_core::{CacheDb, Error};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::fetch::Network;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Accepted by the backend and removed from the queue.
    pub delivered: usize,
    /// Refused by the backend's validation (400 or 422) and dropped.
    pub rejected: usize,
    /// Still queued after this run.
    pub remaining: usize,
}

/// Statuses the contact backend uses to refuse a payload outright. Any other
/// non-2xx answer (408, 425, 429, 5xx, ...) keeps the submission queued.
fn is_rejection(status: u16) -> bool {
    matches!(status, 400 | 422)
}

pub struct SubmissionReplayer {
    store: CacheDb,
    network: Arc<dyn Network>,
    running: Mutex<()>,
}

impl SubmissionReplayer {
    pub fn new(store: CacheDb, network: Arc<dyn Network>) -> Self {
        Self { store, network, running: Mutex::new(()) }
    }

    /// Send queued submissions oldest first.
    ///
    /// A 2xx removes the submission and a validation rejection drops it. The
    /// first transport failure or any other status stops the run, leaving
    /// that submission and everything after it queued for the next
    /// connectivity event.
    /// Concurrent calls run one after the other.
    pub async fn replay(&self) -> Result<ReplayReport, Error> {
        let _running = self.running.lock().await;
        let mut report = ReplayReport::default();

        for submission in self.store.pending_submissions().await? {
            let outcome = self.network.fetch(&submission.to_request()).await;
            match outcome {
                Ok(response) if response.is_success() => {
                    self.store.remove_submission(submission.id).await?;
                    report.delivered += 1;
                    tracing::info!(submission = submission.id, url = %submission.url, "queued submission delivered");
                }
                Ok(response) if is_rejection(response.status) => {
                    self.store.remove_submission(submission.id).await?;
                    report.rejected += 1;
                    tracing::warn!(
                        submission = submission.id,
                        url = %submission.url,
                        status = response.status,
                        "queued submission rejected; dropped"
                    );
                }
                Ok(response) => {
                    let reason = format!("HTTP {}", response.status);
                    self.store.record_submission_failure(submission.id, &reason).await?;
                    tracing::warn!(submission = submission.id, reason = %reason, "replay deferred");
                    break;
                }
                Err(e) => {
                    self.store.record_submission_failure(submission.id, &e.to_string()).await?;
                    tracing::warn!(submission = submission.id, error = %e, "replay deferred");
                    break;
                }
            }
        }

        report.remaining = self.store.count_pending_submissions().await? as usize;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockNetwork, ORIGIN};
    use offcache_core::RequestDescriptor;
    use offcache_core::cache::NewSubmission;

    async fn queue(store: &CacheDb, path: &str, body: &str) {
        let request = RequestDescriptor::new("POST", format!("{ORIGIN}{path}")).with_body(body);
        store.enqueue_submission(&NewSubmission::from_request(&request.url, &request)).await.unwrap();
    }

    async fn setup() -> (CacheDb, Arc<MockNetwork>, SubmissionReplayer) {
        let store = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MockNetwork::new());
        let replayer = SubmissionReplayer::new(store.clone(), network.clone());
        (store, network, replayer)
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order() {
        let (store, network, replayer) = setup().await;
        queue(&store, "/api/contact", "first").await;
        queue(&store, "/api/collaborations", "second").await;
        network.respond(&format!("{ORIGIN}/api/contact"), 200, r#"{"success":true}"#);
        network.respond(&format!("{ORIGIN}/api/collaborations"), 201, r#"{"success":true}"#);

        let report = replayer.replay().await.unwrap();
        assert_eq!(report, ReplayReport { delivered: 2, rejected: 0, remaining: 0 });

        let bodies: Vec<Vec<u8>> = network.calls().into_iter().filter_map(|r| r.body).collect();
        assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_replay_stops_on_failure_and_retains() {
        let (store, network, replayer) = setup().await;
        queue(&store, "/api/contact", "a").await;
        queue(&store, "/api/contact", "b").await;
        network.set_offline(true);

        let report = replayer.replay().await.unwrap();
        assert_eq!(report, ReplayReport { delivered: 0, rejected: 0, remaining: 2 });
        assert_eq!(network.call_count(), 1);

        let pending = store.pending_submissions().await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());
        assert_eq!(pending[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_replay_drops_rejected() {
        let (store, network, replayer) = setup().await;
        queue(&store, "/api/contact", "bad email").await;
        network.respond(&format!("{ORIGIN}/api/contact"), 422, r#"{"success":false}"#);

        let report = replayer.replay().await.unwrap();
        assert_eq!(report, ReplayReport { delivered: 0, rejected: 1, remaining: 0 });
    }

    #[tokio::test]
    async fn test_replay_retains_on_rate_limit() {
        let (store, network, replayer) = setup().await;
        queue(&store, "/api/contact", "hello").await;
        network.respond(&format!("{ORIGIN}/api/contact"), 429, "slow down");

        let report = replayer.replay().await.unwrap();
        assert_eq!(report, ReplayReport { delivered: 0, rejected: 0, remaining: 1 });

        let pending = store.pending_submissions().await.unwrap();
        assert_eq!(pending[0].last_error.as_deref(), Some("HTTP 429"));

        network.respond(&format!("{ORIGIN}/api/contact"), 408, "timeout");
        let report = replayer.replay().await.unwrap();
        assert_eq!(report.remaining, 1);
        assert_eq!(store.pending_submissions().await.unwrap()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_replay_retains_on_server_error() {
        let (store, network, replayer) = setup().await;
        queue(&store, "/api/contact", "a").await;
        network.respond(&format!("{ORIGIN}/api/contact"), 503, "down");

        let report = replayer.replay().await.unwrap();
        assert_eq!(report.remaining, 1);
        assert_eq!(report.delivered, 0);
    }
}
