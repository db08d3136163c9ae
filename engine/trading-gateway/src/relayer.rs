//! Passthrough to the meta-transaction relayer
//!
//! Reads are limited to a fixed allow-list of single-segment paths. They keep
//! the relayer's status, but only successful bodies reach the client. Submissions carry the service's relayer token, which
//! the browser never sees.

use crate::error::{GatewayError, GatewayResult};
use crate::redact::truncate_for_log;
use crate::upstream::{join_url, translate, UpstreamClient, UpstreamRequest, UpstreamResponse};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, warn};

/// Relayer paths the read endpoint forwards
pub const RELAYER_READ_PATHS: [&str; 5] =
    ["nonce", "relay-payload", "transaction", "transactions", "deployed"];

pub const RELAYER_SUBMIT_PATH: &str = "submit";

const RELAYER: &str = "relayer";

/// Replaces the body of a non-2xx relayer read
const READ_FAILED_BODY: &str = r#"{"ok":false,"error":"relayer request failed"}"#;

/// Whether `tail` names exactly one allowed relayer read path
pub fn is_allowed_read_path(tail: &str) -> bool {
    RELAYER_READ_PATHS.contains(&tail)
}

/// Forwards relayer traffic
pub struct RelayerProxy {
    upstream: Arc<dyn UpstreamClient>,
    relayer_url: Option<String>,
    api_key: Option<SecretString>,
}

impl RelayerProxy {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        relayer_url: Option<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self { upstream, relayer_url, api_key }
    }

    fn relayer_url(&self) -> GatewayResult<&str> {
        self.relayer_url
            .as_deref()
            .ok_or_else(|| GatewayError::Config("RELAYER_URL not configured".to_string()))
    }

    /// Forward a read. `tail` is the path below the relayer prefix and
    /// `query` the raw query string, passed on untouched.
    pub async fn read(&self, tail: &str, query: Option<&str>) -> GatewayResult<UpstreamResponse> {
        let result = self.read_inner(tail, query).await;
        record("read", &result);
        result
    }

    async fn read_inner(&self, tail: &str, query: Option<&str>) -> GatewayResult<UpstreamResponse> {
        if !is_allowed_read_path(tail) {
            debug!("Relayer path {:?} not in allow-list", tail);
            return Err(GatewayError::NotFound(format!("unknown relayer path: {}", tail)));
        }

        let mut url = join_url(self.relayer_url()?, tail);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let response =
            self.upstream.send(UpstreamRequest::new(Method::GET, url)).await.map_err(|e| {
                warn!("Relayer unreachable: {}", e);
                GatewayError::upstream(None, "relayer unreachable")
            })?;
        if response.is_success() {
            return Ok(response);
        }

        warn!(
            "Relayer read {} returned {}: {}",
            tail,
            response.status,
            truncate_for_log(&response.body)
        );
        Ok(UpstreamResponse::json(response.status, READ_FAILED_BODY))
    }

    /// Forward a signed transaction with the service's relayer token
    pub async fn submit(
        &self,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> GatewayResult<UpstreamResponse> {
        let result = self.submit_inner(body, content_type).await;
        record("submit", &result);
        result
    }

    async fn submit_inner(
        &self,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> GatewayResult<UpstreamResponse> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| GatewayError::Config("RELAYER_API_KEY not configured".to_string()))?;
        let url = join_url(self.relayer_url()?, RELAYER_SUBMIT_PATH);

        let request = UpstreamRequest::new(Method::POST, url)
            .header("Authorization", format!("Bearer {}", api_key.expose_secret()))
            .raw_body(body, content_type);

        translate(RELAYER, self.upstream.send(request).await)
    }
}

fn record(op: &'static str, result: &GatewayResult<UpstreamResponse>) {
    let outcome = match result {
        Ok(_) => "forwarded",
        Err(GatewayError::NotFound(_)) => "not_found",
        Err(GatewayError::Unauthorized(_)) => "unauthorized",
        Err(GatewayError::Config(_)) => "unconfigured",
        Err(_) => "upstream_error",
    };
    metrics::increment_counter!("gateway_relayer_total", "op" => op, "outcome" => outcome);
}
