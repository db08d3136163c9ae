//! Builder (fee-attribution) signatures
//!
//! Builder headers identify this service to the venue independently of the
//! end user's own L2 credentials. They are signed with a process-wide
//! credential triple that is loaded once at startup and never changes.

use crate::error::{GatewayError, GatewayResult};
use crate::redact::redact;
use crate::signing::{decode_secret, sign_with_key};
use crate::upstream::{UpstreamClient, UpstreamRequest};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const BUILDER_API_KEY_ENV: &str = "POLY_BUILDER_API_KEY";
pub const BUILDER_SECRET_ENV: &str = "POLY_BUILDER_SECRET";
pub const BUILDER_PASSPHRASE_ENV: &str = "POLY_BUILDER_PASSPHRASE";

/// Prefix of configuration the frontend build exposes to browsers
pub const CLIENT_VISIBLE_ENV_PREFIX: &str = "NEXT_PUBLIC_";

pub const BUILDER_SIGNATURE_HEADER: &str = "POLY_BUILDER_SIGNATURE";
pub const BUILDER_TIMESTAMP_HEADER: &str = "POLY_BUILDER_TIMESTAMP";
pub const BUILDER_API_KEY_HEADER: &str = "POLY_BUILDER_API_KEY";
pub const BUILDER_PASSPHRASE_HEADER: &str = "POLY_BUILDER_PASSPHRASE";

/// Service-wide builder credential triple
pub struct BuilderCredentials {
    api_key: String,
    secret_key: Vec<u8>,
    passphrase: SecretString,
}

impl fmt::Debug for BuilderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("secret_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl BuilderCredentials {
    /// Build credentials from explicit values
    pub fn new(
        api_key: impl Into<String>,
        secret: SecretString,
        passphrase: SecretString,
    ) -> GatewayResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GatewayError::Config(format!("{} is empty", BUILDER_API_KEY_ENV)));
        }
        if secret.expose_secret().trim().is_empty() {
            return Err(GatewayError::Config(format!("{} is empty", BUILDER_SECRET_ENV)));
        }
        if passphrase.expose_secret().trim().is_empty() {
            return Err(GatewayError::Config(format!("{} is empty", BUILDER_PASSPHRASE_ENV)));
        }
        let secret_key = decode_secret(secret.expose_secret()).map_err(|_| {
            GatewayError::Config(format!("{} is not valid base64", BUILDER_SECRET_ENV))
        })?;

        Ok(Self { api_key, secret_key, passphrase })
    }

    /// Load from the process environment
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    ///
    /// Fails if any value is missing, or if a client-visible copy of any of
    /// the three names exists at all.
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in [BUILDER_API_KEY_ENV, BUILDER_SECRET_ENV, BUILDER_PASSPHRASE_ENV] {
            let leaked = format!("{}{}", CLIENT_VISIBLE_ENV_PREFIX, name);
            if lookup(&leaked).is_some() {
                return Err(GatewayError::Config(format!(
                    "{} must not be set; builder credentials are server-only",
                    leaked
                )));
            }
        }

        let require = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| GatewayError::Config(format!("{} not set", name)))
        };

        let api_key = require(BUILDER_API_KEY_ENV)?;
        let secret = SecretString::from(require(BUILDER_SECRET_ENV)?);
        let passphrase = SecretString::from(require(BUILDER_PASSPHRASE_ENV)?);

        Self::new(api_key, secret, passphrase)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// `{method, path, body}` as accepted by the builder-sign endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl SignRequest {
    pub fn new(method: &str, path: &str, body: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            path: Some(path.to_string()),
            body: Some(serde_json::Value::String(body.to_string())),
        }
    }

    /// Upper-cased method, path and wire body, or `Malformed`
    pub fn normalize(&self) -> GatewayResult<(String, String, String)> {
        let method = self
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| GatewayError::malformed("method is required"))?
            .to_ascii_uppercase();
        let path = self
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| GatewayError::malformed("path is required"))?
            .to_string();

        Ok((method, path, normalize_body(self.body.as_ref())))
    }
}

/// Exact string the body is signed as.
///
/// Strings are already wire form. Absent bodies sign as empty, and so does
/// anything that will not serialize.
pub fn normalize_body(body: Option<&serde_json::Value>) -> String {
    match body {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// The four builder header values
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderHeaders {
    #[serde(rename = "POLY_BUILDER_SIGNATURE")]
    pub signature: String,
    #[serde(rename = "POLY_BUILDER_TIMESTAMP")]
    pub timestamp: String,
    #[serde(rename = "POLY_BUILDER_API_KEY")]
    pub api_key: String,
    #[serde(rename = "POLY_BUILDER_PASSPHRASE")]
    pub passphrase: String,
}

impl fmt::Debug for BuilderHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderHeaders")
            .field("signature", &redact(&self.signature))
            .field("timestamp", &self.timestamp)
            .field("api_key", &redact(&self.api_key))
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl BuilderHeaders {
    pub fn into_pairs(self) -> Vec<(String, String)> {
        vec![
            (BUILDER_SIGNATURE_HEADER.to_string(), self.signature),
            (BUILDER_TIMESTAMP_HEADER.to_string(), self.timestamp),
            (BUILDER_API_KEY_HEADER.to_string(), self.api_key),
            (BUILDER_PASSPHRASE_HEADER.to_string(), self.passphrase),
        ]
    }
}

/// Computes builder signatures with the service credentials
#[derive(Debug)]
pub struct BuilderSigner {
    credentials: BuilderCredentials,
}

impl BuilderSigner {
    pub fn new(credentials: BuilderCredentials) -> Self {
        Self { credentials }
    }

    /// Signature over `(timestamp, method, path, body)`
    pub fn sign(&self, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
        sign_with_key(&self.credentials.secret_key, timestamp_ms, method, path, body)
    }

    /// Full header set for a given timestamp
    pub fn headers_at(
        &self,
        timestamp_ms: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> BuilderHeaders {
        BuilderHeaders {
            signature: self.sign(timestamp_ms, method, path, body),
            timestamp: timestamp_ms.to_string(),
            api_key: self.credentials.api_key.clone(),
            passphrase: self.credentials.passphrase.expose_secret().to_string(),
        }
    }

    /// Header set stamped with the current time. Never reuse the result for
    /// a second request.
    pub fn headers_for(&self, request: &SignRequest) -> GatewayResult<BuilderHeaders> {
        let (method, path, body) = request.normalize()?;
        let timestamp_ms = Utc::now().timestamp_millis();
        debug!("Builder signature for {} {} at {}", method, path, timestamp_ms);
        Ok(self.headers_at(timestamp_ms, &method, &path, &body))
    }
}

/// Where the gateway gets builder headers from.
///
/// `None` means "send the order without builder attribution"; implementations
/// swallow their own failures after logging them.
#[async_trait]
pub trait BuilderHeaderSource: Send + Sync {
    async fn fetch(&self, request: &SignRequest) -> Option<BuilderHeaders>;
}

/// Signs in-process with the service credentials
pub struct LocalBuilderSource {
    signer: Arc<BuilderSigner>,
}

impl LocalBuilderSource {
    pub fn new(signer: Arc<BuilderSigner>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl BuilderHeaderSource for LocalBuilderSource {
    async fn fetch(&self, request: &SignRequest) -> Option<BuilderHeaders> {
        match self.signer.headers_for(request) {
            Ok(headers) => Some(headers),
            Err(e) => {
                warn!("Local builder signing failed: {}", e);
                None
            }
        }
    }
}

/// Calls a builder-sign endpoint over HTTP, bounded by `timeout`
pub struct RemoteBuilderSource {
    upstream: Arc<dyn UpstreamClient>,
    url: String,
    timeout: Duration,
}

impl RemoteBuilderSource {
    pub fn new(upstream: Arc<dyn UpstreamClient>, url: impl Into<String>, timeout: Duration) -> Self {
        Self { upstream, url: url.into(), timeout }
    }

    async fn request(&self, request: &SignRequest) -> Result<BuilderHeaders, String> {
        let payload = serde_json::to_vec(request).map_err(|e| e.to_string())?;
        let outbound = UpstreamRequest::new(Method::POST, self.url.clone())
            .json_body(payload)
            .timeout(self.timeout);

        let response = tokio::time::timeout(self.timeout, self.upstream.send(outbound))
            .await
            .map_err(|_| "timed out".to_string())?
            .map_err(|e| e.to_string())?;

        if !response.is_success() {
            return Err(format!("status {}", response.status.as_u16()));
        }
        serde_json::from_slice(&response.body).map_err(|e| format!("bad body: {}", e))
    }
}

#[async_trait]
impl BuilderHeaderSource for RemoteBuilderSource {
    async fn fetch(&self, request: &SignRequest) -> Option<BuilderHeaders> {
        match self.request(request).await {
            Ok(headers) => Some(headers),
            Err(reason) => {
                warn!("Builder headers unavailable ({}), continuing without attribution", reason);
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::signing::build_hmac_signature;
    use crate::upstream::testing::MockUpstream;
    use crate::upstream::{TransportError, UpstreamResponse};
    use proptest::prelude::*;
    use reqwest::StatusCode;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn full_env() -> HashMap<String, String> {
        env(&[
            (BUILDER_API_KEY_ENV, "key"),
            (BUILDER_SECRET_ENV, TEST_BUILDER_SECRET),
            (BUILDER_PASSPHRASE_ENV, "pass"),
        ])
    }

    #[test]
    fn test_credentials_load() {
        let vars = full_env();
        let creds = BuilderCredentials::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(creds.api_key(), "key");
    }

    #[test]
    fn test_credentials_missing_value_is_fatal() {
        for missing in [BUILDER_API_KEY_ENV, BUILDER_SECRET_ENV, BUILDER_PASSPHRASE_ENV] {
            let mut vars = full_env();
            vars.remove(missing);
            let err = BuilderCredentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
            assert!(matches!(err, GatewayError::Config(ref m) if m.contains(missing)));
        }

        let mut vars = full_env();
        vars.insert(BUILDER_PASSPHRASE_ENV.to_string(), "  ".to_string());
        assert!(BuilderCredentials::from_lookup(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_client_visible_variant_is_fatal() {
        let mut vars = full_env();
        vars.insert("NEXT_PUBLIC_POLY_BUILDER_SECRET".to_string(), "leak".to_string());
        let err = BuilderCredentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, GatewayError::Config(ref m) if m.contains("NEXT_PUBLIC_")));
    }

    #[test]
    fn test_secret_must_be_base64() {
        let mut vars = full_env();
        vars.insert(BUILDER_SECRET_ENV.to_string(), "not base64!".to_string());
        assert!(BuilderCredentials::from_lookup(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let rendered = format!("{:?}", test_credentials());
        assert!(!rendered.contains("builder-passphrase"));
        assert!(!rendered.contains(TEST_BUILDER_SECRET));
    }

    #[test]
    fn test_sign_matches_shared_primitive() {
        let signer = test_signer();
        let expected =
            build_hmac_signature(TEST_BUILDER_SECRET, 1_700_000_000_000, "POST", "/order", "{}")
                .unwrap();
        assert_eq!(signer.sign(1_700_000_000_000, "POST", "/order", "{}"), expected);

        let headers = signer.headers_at(1_700_000_000_000, "POST", "/order", "{}");
        assert_eq!(headers.timestamp, "1700000000000");
        assert_eq!(headers.api_key, "builder-api-key-0001");
        assert_eq!(headers.passphrase, "builder-passphrase");
        let pairs = headers.into_pairs();
        assert_eq!(pairs[0].0, "POLY_BUILDER_SIGNATURE");
        assert_eq!(pairs[0].1, expected);
    }

    #[test]
    fn test_sign_request_normalization() {
        let req = SignRequest {
            method: Some("post".into()),
            path: Some("/order".into()),
            body: Some(serde_json::json!({"a": 1})),
        };
        assert_eq!(
            req.normalize().unwrap(),
            ("POST".to_string(), "/order".to_string(), r#"{"a":1}"#.to_string())
        );

        let req = SignRequest { method: Some("GET".into()), path: Some("/x".into()), body: None };
        assert_eq!(req.normalize().unwrap().2, "");

        let req = SignRequest { method: None, path: Some("/x".into()), body: None };
        assert!(matches!(req.normalize(), Err(GatewayError::Malformed(_))));

        let req = SignRequest { method: Some("GET".into()), path: Some(" ".into()), body: None };
        assert!(matches!(req.normalize(), Err(GatewayError::Malformed(_))));
    }

    #[test]
    fn test_headers_serialize_with_wire_names() {
        let headers = test_signer().headers_at(1, "GET", "/x", "");
        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["POLY_BUILDER_TIMESTAMP"], "1");
        assert!(json.get("POLY_BUILDER_SIGNATURE").is_some());
        assert!(json.get("POLY_BUILDER_API_KEY").is_some());
        assert!(json.get("POLY_BUILDER_PASSPHRASE").is_some());
    }

    #[tokio::test]
    async fn test_local_source_signs() {
        let source = LocalBuilderSource::new(test_signer());
        let headers = source.fetch(&SignRequest::new("POST", "/order", "{}")).await;
        assert!(headers.is_some());

        let bad = SignRequest { method: None, path: None, body: None };
        assert!(source.fetch(&bad).await.is_none());
    }

    #[tokio::test]
    async fn test_remote_source_parses_headers() {
        let headers = test_signer().headers_at(5, "POST", "/order", "{}");
        let body = serde_json::to_vec(&headers).unwrap();
        let upstream = Arc::new(MockUpstream::new());
        upstream.push(Ok(UpstreamResponse::json(StatusCode::OK, body)));

        let source = RemoteBuilderSource::new(
            upstream.clone(),
            "http://signer/api/builder/sign",
            Duration::from_secs(1),
        );
        let fetched = source.fetch(&SignRequest::new("POST", "/order", "{}")).await;

        assert_eq!(fetched, Some(headers));
        let sent = upstream.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::POST);
        let sent_body: serde_json::Value =
            serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(sent_body["path"], "/order");
    }

    #[tokio::test]
    async fn test_remote_source_degrades_to_none() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.push(Ok(UpstreamResponse::json(StatusCode::INTERNAL_SERVER_ERROR, "{}")));
        upstream.push(Err(TransportError::Connect("refused".into())));
        upstream.push(Ok(UpstreamResponse::json(StatusCode::OK, "not json")));

        let source =
            RemoteBuilderSource::new(upstream.clone(), "http://signer", Duration::from_secs(1));
        let req = SignRequest::new("POST", "/order", "{}");
        assert!(source.fetch(&req).await.is_none());
        assert!(source.fetch(&req).await.is_none());
        assert!(source.fetch(&req).await.is_none());
    }

    struct StalledUpstream;

    #[async_trait]
    impl UpstreamClient for StalledUpstream {
        async fn send(
            &self,
            _request: UpstreamRequest,
        ) -> Result<crate::upstream::UpstreamResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TransportError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_remote_source_times_out() {
        let source = RemoteBuilderSource::new(
            Arc::new(StalledUpstream),
            "http://signer",
            Duration::from_millis(200),
        );
        assert!(source.fetch(&SignRequest::new("POST", "/order", "")).await.is_none());
    }

    proptest! {
        #[test]
        fn prop_signature_reproducible_and_body_sensitive(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            idx in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
            ts in 0i64..4_000_000_000_000,
        ) {
            let signer = test_signer();
            let body = String::from_utf8_lossy(&body).into_owned();
            let a = signer.sign(ts, "POST", "/order", &body);
            let b = signer.sign(ts, "POST", "/order", &body);
            prop_assert_eq!(&a, &b);

            let mut bytes = body.clone().into_bytes();
            let i = idx.index(bytes.len());
            bytes[i] ^= flip;
            let perturbed = String::from_utf8_lossy(&bytes).into_owned();
            prop_assume!(perturbed != body);
            prop_assert_ne!(a, signer.sign(ts, "POST", "/order", &perturbed));
        }
    }
}
