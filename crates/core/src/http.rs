//! Request and response descriptors exchanged with the host runtime.
//!
//! Header names are stored lowercased in a `BTreeMap`, so two descriptors
//! that differ only in header order or case compare equal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lowercased header name -> value.
pub type Headers = BTreeMap<String, String>;

/// Request mode reported by the host for an intercepted fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Full-page load.
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigate" => Self::Navigate,
            "no-cors" => Self::NoCors,
            "cors" => Self::Cors,
            _ => Self::SameOrigin,
        }
    }
}

/// Normalized content family of an `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptFamily {
    Document,
    Image,
}

impl AcceptFamily {
    /// Classify an `Accept` header value. Returns `None` for wildcard or
    /// non-document, non-image accepts.
    pub fn from_accept(accept: &str) -> Option<Self> {
        let accept = accept.to_ascii_lowercase();
        let first = accept.split(',').next().unwrap_or("").trim();
        if first.starts_with("image/") {
            Some(Self::Image)
        } else if first.starts_with("text/html") || first.starts_with("application/xhtml") {
            Some(Self::Document)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Absolute or origin-relative URL.
    pub url: String,
    /// Uppercased HTTP method.
    pub method: String,
    pub headers: Headers,
    pub mode: RequestMode,
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// A plain GET with no headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            headers: Headers::new(),
            mode: RequestMode::default(),
            body: None,
        }
    }

    /// A full-page navigation GET.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::get(url)
            .with_mode(RequestMode::Navigate)
            .with_header("accept", "text/html,application/xhtml+xml")
    }

    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self { method: method.trim().to_ascii_uppercase(), ..Self::get(url) }
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    pub fn accept_family(&self) -> Option<AcceptFamily> {
        self.accept().and_then(AcceptFamily::from_accept)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A response handed back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseDescriptor {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Headers::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
