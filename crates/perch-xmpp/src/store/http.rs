//! HTTP content store gateway.
//!
//! Maps a [`StoreRequest`] onto `METHOD base_url/node[/item-id]?query` and
//! returns the status and body verbatim. Single attempt, no retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{StoreGateway, StoreMethod, StoreRequest, StoreResponse};
use crate::error::StoreError;
use crate::BridgeError;

/// Media type requested from the store.
const ACCEPT_XML: &str = "application/xml";

/// Store gateway speaking plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpStoreGateway {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpStoreGateway {
    /// Create a gateway rooted at `base_url`.
    ///
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BridgeError::config(format!("invalid store URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::config(format!(
                "store URL '{}' cannot carry a path",
                base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("perch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::config(format!("failed to build HTTP client: {}", e)))?;

        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "HTTP store gateway initialized");

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// Base URL all request paths are appended to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full URL for a request.
    ///
    /// Node names may span several path segments (`users/5/notes`). The item
    /// id is always one segment, percent-encoded as needed. Dot segments are
    /// refused since URL normalisation would resolve them against the node.
    pub fn url_for(&self, request: &StoreRequest) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidRequest("base URL cannot carry a path".into()))?;
            segments.pop_if_empty();
            for segment in request.node.split('/').filter(|s| !s.is_empty()) {
                segments.push(checked_segment(segment)?);
            }
            if let Some(item_id) = &request.item_id {
                segments.push(checked_segment(item_id)?);
            }
        }

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    fn method(method: StoreMethod) -> reqwest::Method {
        match method {
            StoreMethod::Get => reqwest::Method::GET,
            StoreMethod::Post => reqwest::Method::POST,
            StoreMethod::Put => reqwest::Method::PUT,
            StoreMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Reject segments the URL parser would treat as relative references.
fn checked_segment(segment: &str) -> Result<&str, StoreError> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(StoreError::InvalidRequest(format!(
            "'{}' is not a valid path segment",
            segment
        )));
    }
    Ok(segment)
}

#[async_trait]
impl StoreGateway for HttpStoreGateway {
    #[instrument(
        name = "perch.store.http",
        skip(self, request),
        fields(method = %request.method, path = %request.path())
    )]
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse, StoreError> {
        let url = self.url_for(&request)?;

        let mut builder = self
            .http
            .request(Self::method(request.method), url)
            .header(ACCEPT, ACCEPT_XML);

        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if matches!(request.method, StoreMethod::Post | StoreMethod::Put) {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(error = %e, "Store request timed out");
                StoreError::Timeout(self.timeout)
            } else {
                warn!(error = %e, "Store request failed");
                StoreError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.timeout)
            } else {
                StoreError::Transport(format!("failed to read body: {}", e))
            }
        })?;

        debug!(status, bytes = body.len(), "Store responded");

        Ok(StoreResponse { status, body })
    }
}
