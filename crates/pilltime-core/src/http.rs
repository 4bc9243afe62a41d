//! Request and response value types flowing through the cache.
//!
//! These mirror the subset of the fetch API the worker needs: a request is
//! identified by its method and absolute URL, and a response is a snapshot
//! that can be cloned so one copy is stored while the other is returned.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchError;

/// Status returned by the synthetic offline response.
pub const FALLBACK_STATUS: u16 = 503;

/// Body of the synthetic offline response.
const FALLBACK_BODY: &str = "Network unavailable";

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

    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// An outgoing resource request.
///
/// The URL may be relative (`./index.html`) until [`Request::resolve`] is
/// called against the worker scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::Get
    }

    /// Resolve the URL against `base` and drop any fragment.
    pub fn resolve(&self, base: &Url) -> Result<Self, FetchError> {
        let mut url = base
            .join(&self.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        url.set_fragment(None);
        Ok(Self {
            method: self.method,
            url: url.to_string(),
            body: self.body.clone(),
        })
    }

    /// Identity used to key cache entries: method plus URL.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Classification of a response relative to the worker's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response
    Basic,
    /// Cross-origin response with CORS headers
    Cors,
    /// Cross-origin response with no readable content
    Opaque,
    /// Synthetic response produced when the network is unavailable
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub kind: ResponseType,
    #[serde(default)]
    pub url: Option<String>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseType::Basic,
            url: None,
        }
    }

    pub fn with_kind(mut self, kind: ResponseType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Minimal response returned instead of a network error.
    pub fn fallback() -> Self {
        Self {
            status: FALLBACK_STATUS,
            status_text: "Service Unavailable".to_string(),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: FALLBACK_BODY.as_bytes().to_vec(),
            kind: ResponseType::Error,
            url: None,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this response may be written back into the cache at runtime.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseType::Basic
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
