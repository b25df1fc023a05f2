//! Request and response snapshot types shared by every part of the agent.
//!
//! Requests cross the interception seam as plain owned data so they can be
//! classified, replayed, and persisted without lifetimes. Responses carry the
//! full body so a stored entry can be returned byte-for-byte later.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP methods the agent routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// Safe methods are the only ones whose responses may be stored.
    pub fn is_safe(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the client surface initiated a request.
///
/// `Navigate` marks a top-level page load; everything else is a subresource
/// or programmatic fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
    Navigate,
    Cors,
    #[default]
    NoCors,
}

/// An intercepted request, snapshotted as plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    #[serde(default)]
    pub mode: FetchMode,
    /// Caller opt-in: if this mutation fails for connectivity reasons, queue
    /// it for replay instead of surfacing the failure.
    #[serde(default)]
    pub defer_on_failure: bool,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            mode: FetchMode::NoCors,
            defer_on_failure: false,
        }
    }

    /// A top-level page load.
    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            mode: FetchMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.defer_on_failure = true;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == FetchMode::Navigate
    }
}

/// Identity of a cacheable request inside a store.
///
/// Only safe methods have keys; a response to anything else is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    /// Key for a request, if its method is cacheable.
    pub fn for_request(request: &Request) -> Option<Self> {
        request.method.is_safe().then(|| Self {
            method: request.method,
            url: request.url.clone(),
        })
    }

    /// Key under which a plain GET of `url` is stored.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
        }
    }

    /// Canonical string form used as the store key.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A response snapshot: status, headers, and the full body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lookup by lower-cased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// The storage criterion: anything below 400 is a usable response.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

// ============================================================================
// Tests
// ============================================================================
