//! Network access for cache misses and install-time asset fetches.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::http::{Request, Response, ResponseType};

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. Any HTTP status is a successful fetch; only
    /// transport failures are errors, with unreachable hosts and timeouts
    /// reported as `FetchError::Offline`.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `Network` backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    scope: Url,
}

impl HttpNetwork {
    pub fn new(scope: Url, timeout_secs: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client, scope })
    }

    fn classify(&self, url: &Url) -> ResponseType {
        if url.origin() == self.scope.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let request = request.resolve(&self.scope)?;
        let mut builder = self.client.request(request.method.into(), &request.url);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                FetchError::Offline(format!("{}: {}", request.url, e))
            } else {
                FetchError::Network(e)
            }
        })?;
        let status = response.status();
        let kind = self.classify(response.url());
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %request.url, status = status.as_u16(), kind = ?kind, "Network response");
        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            kind,
            url: Some(final_url),
        })
    }
}
