//! Cacheability classification.
//!
//! [`Classifier::classify`] walks an ordered rule table top-down and returns
//! the label of the first rule that applies. It is pure: no I/O, no clock,
//! no interior state, so the same request always gets the same label.

use std::fmt;

use offcache_core::{AcceptFamily, AppConfig, Error, RequestDescriptor, RequestKey};
use url::{Origin, Url};

use crate::fetch::{canonicalize, resolve};

/// How a request participates in caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheabilityLabel {
    /// Stale-while-revalidate (cache-first until network activity).
    StaticAsset,
    /// Network-first with a bounded timeout.
    NavigationDocument,
    /// Straight to the network; the cache is never touched.
    Excluded,
}

impl CacheabilityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticAsset => "static-asset",
            Self::NavigationDocument => "navigation-document",
            Self::Excluded => "excluded",
        }
    }
}

impl fmt::Display for CacheabilityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "avif", "bmp"];

/// A request as the rules see it.
struct RequestView<'a> {
    request: &'a RequestDescriptor,
    url: Option<Url>,
}

struct Rule {
    name: &'static str,
    label: CacheabilityLabel,
    applies: fn(&Classifier, &RequestView<'_>) -> bool,
}

fn non_get(_: &Classifier, view: &RequestView<'_>) -> bool {
    view.request.method != "GET"
}

fn out_of_scope(classifier: &Classifier, view: &RequestView<'_>) -> bool {
    match &view.url {
        Some(url) => !classifier.is_same_origin(url) && !classifier.is_allowlisted(url),
        None => true,
    }
}

fn dynamic_endpoint(classifier: &Classifier, view: &RequestView<'_>) -> bool {
    view.url.as_ref().is_some_and(|url| {
        classifier.is_same_origin(url) && classifier.excluded_prefixes.iter().any(|p| url.path().starts_with(p))
    })
}

fn navigation(classifier: &Classifier, view: &RequestView<'_>) -> bool {
    view.request.is_navigation() && view.url.as_ref().is_some_and(|url| classifier.is_same_origin(url))
}

fn static_asset(classifier: &Classifier, view: &RequestView<'_>) -> bool {
    let Some(url) = &view.url else { return false };
    if classifier.is_allowlisted(url) {
        return true;
    }
    let extension_match = extension(url).is_some_and(|ext| classifier.static_extensions.iter().any(|e| *e == ext));
    extension_match || classifier.static_prefixes.iter().any(|p| url.path().starts_with(p))
}

/// Evaluated top-down; the first match wins. Unmatched requests are excluded.
const RULES: &[Rule] = &[
    Rule { name: "non-get", label: CacheabilityLabel::Excluded, applies: non_get },
    Rule { name: "out-of-scope", label: CacheabilityLabel::Excluded, applies: out_of_scope },
    Rule { name: "dynamic-endpoint", label: CacheabilityLabel::Excluded, applies: dynamic_endpoint },
    Rule { name: "navigation", label: CacheabilityLabel::NavigationDocument, applies: navigation },
    Rule { name: "static-asset", label: CacheabilityLabel::StaticAsset, applies: static_asset },
];

/// Lowercased extension of the last path segment.
fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Request classifier bound to one application origin.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Url,
    allowlist: Vec<Origin>,
    excluded_prefixes: Vec<String>,
    static_extensions: Vec<String>,
    static_prefixes: Vec<String>,
    cache_busting_params: Vec<String>,
}

impl Classifier {
    /// Build a classifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the origin or an allowlisted origin does not parse.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("origin: {e}")))?;
        let allowlist = config
            .allowlist_origins
            .iter()
            .map(|o| Url::parse(o).map(|u| u.origin()).map_err(|e| Error::InvalidUrl(format!("{o}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            origin,
            allowlist,
            excluded_prefixes: config.excluded_prefixes.clone(),
            static_extensions: config.static_extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            static_prefixes: config.static_prefixes.clone(),
            cache_busting_params: config.cache_busting_params.clone(),
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Label a request. Pure and deterministic.
    pub fn classify(&self, request: &RequestDescriptor) -> CacheabilityLabel {
        let view = RequestView { request, url: resolve(&self.origin, &request.url).ok() };
        for rule in RULES {
            if (rule.applies)(self, &view) {
                tracing::debug!(url = %request.url, rule = rule.name, label = %rule.label, "classified");
                return rule.label;
            }
        }
        CacheabilityLabel::Excluded
    }

    /// Rewrite the request URL to its absolute form. Unresolvable URLs are
    /// left untouched; they classify as `Excluded`.
    pub fn absolutize(&self, mut request: RequestDescriptor) -> RequestDescriptor {
        if let Ok(url) = resolve(&self.origin, &request.url) {
            request.url = url.into();
        }
        request
    }

    /// Canonical URL used for keying, with cache-busting parameters removed.
    pub fn canonical_url(&self, url: &str) -> Option<Url> {
        canonicalize(&self.origin, url, &self.cache_busting_params).ok()
    }

    /// Cache key for a request, or `None` when the URL cannot be canonicalized.
    pub fn request_key(&self, request: &RequestDescriptor) -> Option<RequestKey> {
        let url = self.canonical_url(&request.url)?;
        Some(RequestKey::new(&request.method, url.as_str(), self.accept_family(request)))
    }

    /// Accept family from the header, falling back to navigation mode and
    /// the URL's extension.
    pub fn accept_family(&self, request: &RequestDescriptor) -> Option<AcceptFamily> {
        if let Some(family) = request.accept_family() {
            return Some(family);
        }
        if request.is_navigation() {
            return Some(AcceptFamily::Document);
        }
        let url = resolve(&self.origin, &request.url).ok()?;
        extension(&url)
            .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .map(|_| AcceptFamily::Image)
    }

    /// Whether a form submission to this request's URL should be queued
    /// when the network is unavailable.
    pub fn is_form_endpoint(&self, request: &RequestDescriptor, endpoints: &[String]) -> bool {
        request.method == "POST"
            && resolve(&self.origin, &request.url)
                .is_ok_and(|url| self.is_same_origin(&url) && endpoints.iter().any(|e| url.path() == e))
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn is_allowlisted(&self, url: &Url) -> bool {
        let origin = url.origin();
        self.allowlist.iter().any(|allowed| *allowed == origin)
    }
}
