//! Degraded responses for when both cache and network fail.
//!
//! Navigations get the pre-cached offline document, image requests the
//! pre-cached placeholder, everything else a synthetic 503. When the
//! pre-cached copies are missing or the store is unreadable, built-in bodies
//! stand in, so `resolve` always produces a response.

use std::sync::Arc;

use offcache_core::{AcceptFamily, CacheDb, Error, RequestDescriptor, RequestKey, ResponseDescriptor};

use crate::classify::Classifier;
use crate::lifecycle::ActiveGeneration;

/// Header naming which fallback produced a response.
pub const FALLBACK_HEADER: &str = "x-offcache-fallback";

const BUILTIN_OFFLINE_HTML: &str = "<!doctype html><html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"><title>Offline</title></head>\
<body><main><h1>You're offline</h1><p>This page isn't available without a connection. \
It will load again once you're back online.</p></main></body></html>";

const BUILTIN_PLACEHOLDER_SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"400\" height=\"400\" \
viewBox=\"0 0 400 400\"><rect width=\"400\" height=\"400\" fill=\"#1f1f1f\"/></svg>";

/// Which degraded response a request receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    OfflineDocument,
    PlaceholderImage,
    Unavailable,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfflineDocument => "offline-document",
            Self::PlaceholderImage => "placeholder-image",
            Self::Unavailable => "unavailable",
        }
    }
}

pub struct FallbackResolver {
    store: CacheDb,
    active: ActiveGeneration,
    classifier: Arc<Classifier>,
    offline_document: String,
    placeholder_image: String,
    retry_after_secs: u64,
}

impl FallbackResolver {
    pub fn new(
        store: CacheDb, active: ActiveGeneration, classifier: Arc<Classifier>, offline_document: String,
        placeholder_image: String, retry_after_secs: u64,
    ) -> Self {
        Self { store, active, classifier, offline_document, placeholder_image, retry_after_secs }
    }

    /// Pick the fallback for a request.
    pub fn kind_for(&self, request: &RequestDescriptor) -> FallbackKind {
        match self.classifier.accept_family(request) {
            Some(AcceptFamily::Document) => FallbackKind::OfflineDocument,
            Some(AcceptFamily::Image) => FallbackKind::PlaceholderImage,
            None => FallbackKind::Unavailable,
        }
    }

    /// Produce a degraded response. Never fails.
    pub async fn resolve(&self, request: &RequestDescriptor, reason: &Error) -> ResponseDescriptor {
        let kind = self.kind_for(request);
        tracing::info!(url = %request.url, fallback = kind.as_str(), reason = %reason, "serving fallback");

        let response = match kind {
            FallbackKind::OfflineDocument => match self.precached(&self.offline_document).await {
                Some(response) => response,
                None => ResponseDescriptor::new(503, BUILTIN_OFFLINE_HTML)
                    .with_header("content-type", "text/html; charset=utf-8")
                    .with_header("retry-after", self.retry_after_secs.to_string()),
            },
            FallbackKind::PlaceholderImage => match self.precached(&self.placeholder_image).await {
                Some(response) => response,
                None => ResponseDescriptor::new(200, BUILTIN_PLACEHOLDER_SVG)
                    .with_header("content-type", "image/svg+xml"),
            },
            FallbackKind::Unavailable => self.unavailable(),
        };

        response.with_header(FALLBACK_HEADER, kind.as_str())
    }

    /// Synthetic 503 with a `Retry-After` hint.
    pub fn unavailable(&self) -> ResponseDescriptor {
        ResponseDescriptor::new(503, "Service Unavailable")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_header("retry-after", self.retry_after_secs.to_string())
    }

    async fn precached(&self, path: &str) -> Option<ResponseDescriptor> {
        let generation = self.active.current().await?;
        let url = self.classifier.canonical_url(path)?;
        let key = RequestKey::get(url.as_str());
        match self.store.get_entry(&generation, &key.hash).await {
            Ok(entry) => entry.map(|e| e.to_response()),
            Err(e) => {
                tracing::warn!(path, error = %e, "fallback lookup failed; using built-in body");
                None
            }
        }
    }
}
