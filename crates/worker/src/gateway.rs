//! Request interception: absolutize, classify, execute, recover.

use std::sync::Arc;

use offcache_core::cache::NewSubmission;
use offcache_core::{CacheDb, Error, RequestDescriptor, ResponseDescriptor};

use crate::classify::Classifier;
use crate::fallback::FallbackResolver;
use crate::strategy::StrategyExecutor;

const QUEUED_MESSAGE: &str = "You're offline. Your message was saved and will be sent when the connection returns.";

pub struct Gateway {
    classifier: Arc<Classifier>,
    executor: Arc<StrategyExecutor>,
    fallback: Arc<FallbackResolver>,
    store: CacheDb,
    form_endpoints: Vec<String>,
}

impl Gateway {
    pub fn new(
        classifier: Arc<Classifier>, executor: Arc<StrategyExecutor>, fallback: Arc<FallbackResolver>, store: CacheDb,
        form_endpoints: Vec<String>,
    ) -> Self {
        Self { classifier, executor, fallback, store, form_endpoints }
    }

    /// Serve one intercepted request. Always produces a response.
    pub async fn handle(&self, request: RequestDescriptor) -> ResponseDescriptor {
        let request = self.classifier.absolutize(request);
        let label = self.classifier.classify(&request);
        tracing::debug!(method = %request.method, url = %request.url, label = %label, "intercepted");

        match self.executor.execute(&request, label).await {
            Ok(response) => response,
            Err(e) => self.recover(&request, e).await,
        }
    }

    /// A failed excluded request. Offline form posts are queued for replay;
    /// everything else gets the fallback response.
    async fn recover(&self, request: &RequestDescriptor, error: Error) -> ResponseDescriptor {
        if error.is_network() && self.classifier.is_form_endpoint(request, &self.form_endpoints) {
            match self.store.enqueue_submission(&NewSubmission::from_request(&request.url, request)).await {
                Ok(id) => {
                    tracing::info!(url = %request.url, submission = id, "form submission queued for replay");
                    return queued_response(id);
                }
                Err(e) => tracing::warn!(url = %request.url, error = %e, "failed to queue form submission"),
            }
        }
        self.fallback.resolve(request, &error).await
    }
}

/// 202 in the shape the contact backend answers with, plus the queue id.
fn queued_response(id: i64) -> ResponseDescriptor {
    let body = serde_json::json!({
        "success": false,
        "queued": true,
        "submissionId": id,
        "errors": [QUEUED_MESSAGE],
    });
    ResponseDescriptor::new(202, body.to_string()).with_header("content-type", "application/json")
}
