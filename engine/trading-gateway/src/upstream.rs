//! Outbound HTTP to the venue, the relayer and the builder-sign endpoint
//!
//! Everything that leaves the process goes through [`UpstreamClient`] so the
//! gateway can be exercised against a recording double in tests.

use crate::error::{GatewayError, GatewayResult};
use crate::redact::truncate_for_log;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// A single outbound request
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Overrides the client-wide timeout for this call
    pub timeout: Option<Duration>,
}

impl UpstreamRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: None, timeout: None }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.headers.extend(headers);
        self
    }

    pub fn json_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self.header("content-type", "application/json")
    }

    pub fn raw_body(mut self, body: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        self.body = Some(body.into());
        match content_type {
            Some(ct) => self.header("content-type", ct),
            None => self,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a header on this request, ignoring case
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Upstream response as received, body untouched
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn json(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self { status, content_type: Some("application/json".to_string()), body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    }
}

/// Failures below HTTP: nothing came back
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    Request(String),
}

/// Sends requests to upstream services
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed client used in production
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    /// Create a client whose calls fail after `timeout` unless overridden per request
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        debug!("Upstream {} {}", request.method, request.url);

        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(UpstreamResponse { status, content_type, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::Request(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}

/// Map an upstream outcome onto the gateway's error taxonomy.
///
/// 2xx responses pass through untouched. 401/403 become `Unauthorized`;
/// every other status and every transport failure becomes `Upstream`. The
/// upstream body is only ever logged, truncated, and never returned.
pub fn translate(
    service: &str,
    outcome: Result<UpstreamResponse, TransportError>,
) -> GatewayResult<UpstreamResponse> {
    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            warn!("{} unreachable: {}", service, e);
            return Err(GatewayError::upstream(None, format!("{} unreachable", service)));
        }
    };

    if response.is_success() {
        return Ok(response);
    }

    let status = response.status.as_u16();
    warn!("{} returned {}: {}", service, status, truncate_for_log(&response.body));
    if response.is_auth_failure() {
        Err(GatewayError::unauthorized(format!("{} rejected credentials", service)))
    } else {
        Err(GatewayError::upstream(Some(status), format!("{} request failed", service)))
    }
}

/// Join a configured host and a path without doubling slashes
pub fn join_url(host: &str, path: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
}
