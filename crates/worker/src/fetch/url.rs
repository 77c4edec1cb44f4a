//! URL canonicalization for consistent request keys.

use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resolve a request URL against the application origin.
///
/// Absolute URLs are parsed as-is; anything else is joined onto `origin`.
/// Only http(s) results are accepted.
pub fn resolve(origin: &Url, input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = if trimmed.contains("://") || trimmed.starts_with("data:") || trimmed.starts_with("blob:") {
        Url::parse(trimmed)
    } else {
        origin.join(trimmed)
    }
    .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
}

/// Whether a query parameter name matches one of the cache-busting patterns.
/// A trailing `*` turns a pattern into a prefix match.
pub fn is_cache_busting(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    })
}

/// Match one raw `name=value` query segment by its decoded name.
fn segment_is_cache_busting(segment: &str, patterns: &[String]) -> bool {
    let raw_name = segment.split('=').next().unwrap_or_default();
    url::form_urlencoded::parse(raw_name.as_bytes())
        .next()
        .is_some_and(|(name, _)| is_cache_busting(&name, patterns))
}

/// Canonicalize a request URL for use as a cache key.
///
/// Normalization steps:
/// 1. Resolve against `origin` (see [`resolve`])
/// 2. Lowercase the host
/// 3. Remove fragment (#...)
/// 4. Drop cache-busting query parameters; the remaining segments keep their
///    order and their original encoding
pub fn canonicalize(origin: &Url, input: &str, cache_busting: &[String]) -> Result<Url, UrlError> {
    let mut parsed = resolve(origin, input)?;

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    let stripped = parsed.query().map(|query| {
        query
            .split('&')
            .filter(|segment| !segment.is_empty() && !segment_is_cache_busting(segment, cache_busting))
            .collect::<Vec<_>>()
            .join("&")
    });
    if let Some(query) = stripped {
        parsed.set_query(if query.is_empty() { None } else { Some(&query) });
    }

    Ok(parsed)
}
