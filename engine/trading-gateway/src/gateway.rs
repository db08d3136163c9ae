//! Main OrderGateway implementation
//!
//! Order submission runs as a fixed sequence: session gate, payload
//! validation, L2 headers, best-effort builder headers, one upstream call and
//! response translation. Nothing is retried; a placement that fails is
//! reported once and the caller decides what to do next.

use crate::builder::{BuilderHeaderSource, SignRequest};
use crate::error::{GatewayError, GatewayResult};
use crate::l2::{
    L2Credentials, L2HeaderBuilder, L2_ADDRESS_HEADER, L2_SIGNATURE_HEADER, L2_TIMESTAMP_HEADER,
};
use crate::order::{is_address, parse_order};
use crate::redact::redact;
use crate::session::{SessionId, SessionManager};
use crate::upstream::{join_url, translate, UpstreamClient, UpstreamRequest, UpstreamResponse};
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ORDER_PATH: &str = "/order";
pub const CREATE_API_KEY_PATH: &str = "/auth/api-key";
pub const DERIVE_API_KEY_PATH: &str = "/auth/derive-api-key";

pub const L1_NONCE_HEADER: &str = "POLY_NONCE";

/// Reserved headers the link endpoint accepts from the browser
pub const LINK_HEADERS: &[&str] =
    &[L2_ADDRESS_HEADER, L2_SIGNATURE_HEADER, L2_TIMESTAMP_HEADER, L1_NONCE_HEADER];

const VENUE: &str = "venue";

/// Wallet-signed (L1) proof the browser forwards when linking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Headers {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl L1Headers {
    /// Read the L1 headers through `lookup`, which must ignore case
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| GatewayError::malformed(format!("{} header is required", name)))
        };

        let address = require(L2_ADDRESS_HEADER)?;
        if !is_address(&address) {
            return Err(GatewayError::malformed("POLY_ADDRESS must be a 0x-prefixed address"));
        }
        let signature = require(L2_SIGNATURE_HEADER)?;
        let timestamp = require(L2_TIMESTAMP_HEADER)?;
        if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GatewayError::malformed("POLY_TIMESTAMP must be unix seconds"));
        }
        let nonce = lookup(L1_NONCE_HEADER)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "0".to_string());

        Ok(Self { address, signature, timestamp, nonce })
    }

    fn into_pairs(self) -> Vec<(String, String)> {
        vec![
            (L2_ADDRESS_HEADER.to_string(), self.address),
            (L2_SIGNATURE_HEADER.to_string(), self.signature),
            (L2_TIMESTAMP_HEADER.to_string(), self.timestamp),
            (L1_NONCE_HEADER.to_string(), self.nonce),
        ]
    }
}

/// Result of a successful link
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub session_id: SessionId,
    pub wallet_address: String,
}

/// Submits wallet-signed orders to the venue on behalf of linked sessions
pub struct OrderGateway {
    sessions: Arc<SessionManager>,
    upstream: Arc<dyn UpstreamClient>,
    builder: Arc<dyn BuilderHeaderSource>,
    venue_url: Option<String>,
}

impl OrderGateway {
    pub fn new(
        sessions: Arc<SessionManager>,
        upstream: Arc<dyn UpstreamClient>,
        builder: Arc<dyn BuilderHeaderSource>,
        venue_url: Option<String>,
    ) -> Self {
        Self { sessions, upstream, builder, venue_url }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    fn venue_url(&self) -> GatewayResult<&str> {
        self.venue_url
            .as_deref()
            .ok_or_else(|| GatewayError::Config("CLOB_API_URL not configured".to_string()))
    }

    /// Submit an order for the session named by `cookie`
    pub async fn submit(&self, cookie: Option<&str>, body: &[u8]) -> GatewayResult<UpstreamResponse> {
        let result = self.submit_inner(cookie, body).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(GatewayError::Unauthorized(_)) => "unauthorized",
            Err(GatewayError::Malformed(_)) => "malformed",
            Err(GatewayError::Upstream { .. }) => "upstream_error",
            Err(_) => "error",
        };
        metrics::increment_counter!("gateway_orders_total", "outcome" => outcome);
        result
    }

    async fn submit_inner(
        &self,
        cookie: Option<&str>,
        body: &[u8],
    ) -> GatewayResult<UpstreamResponse> {
        let linked = self.sessions.require_linked(cookie).await?;
        let order = parse_order(body)?;
        let venue = self.venue_url()?;

        let payload = order.venue_body(&linked.l2.api_key)?;
        let l2_headers = L2HeaderBuilder::build(
            &linked.wallet_address,
            &linked.l2,
            Method::POST.as_str(),
            ORDER_PATH,
            &payload,
        )?;

        let sign_request = SignRequest::new(Method::POST.as_str(), ORDER_PATH, &payload);
        let builder_headers = match self.builder.fetch(&sign_request).await {
            Some(headers) => {
                metrics::increment_counter!("gateway_builder_headers_total", "outcome" => "attached");
                headers.into_pairs()
            }
            None => {
                metrics::increment_counter!("gateway_builder_headers_total", "outcome" => "omitted");
                Vec::new()
            }
        };

        debug!(
            "Submitting order for wallet {} (key {}, {} builder headers)",
            linked.wallet_address,
            redact(&linked.l2.api_key),
            builder_headers.len()
        );

        let request = UpstreamRequest::new(Method::POST, join_url(venue, ORDER_PATH))
            .headers(l2_headers)
            .headers(builder_headers)
            .json_body(payload);

        let response = translate(VENUE, self.upstream.send(request).await)?;
        info!("Order accepted by venue for wallet {}", linked.wallet_address);
        Ok(response)
    }

    /// Obtain venue credentials for the wallet proven by `l1` and link them
    /// to a fresh session.
    ///
    /// The venue is asked to create a key first; if that fails for any
    /// reason other than rejected credentials the existing key is derived
    /// instead.
    pub async fn link(&self, cookie: Option<&str>, l1: L1Headers) -> GatewayResult<LinkOutcome> {
        let venue = self.venue_url()?;
        let wallet_address = l1.address.clone();
        let headers = l1.into_pairs();

        let create = UpstreamRequest::new(Method::POST, join_url(venue, CREATE_API_KEY_PATH))
            .headers(headers.clone());
        let response = match self.upstream.send(create).await {
            Ok(response) if !response.is_success() && !response.is_auth_failure() => {
                warn!(
                    "Venue key creation returned {}, deriving existing key",
                    response.status.as_u16()
                );
                let derive = UpstreamRequest::new(Method::GET, join_url(venue, DERIVE_API_KEY_PATH))
                    .headers(headers);
                translate(VENUE, self.upstream.send(derive).await)?
            }
            outcome => translate(VENUE, outcome)?,
        };

        let l2: L2Credentials = serde_json::from_slice(&response.body).map_err(|e| {
            warn!("Venue returned unusable credentials: {}", e);
            GatewayError::upstream(Some(response.status.as_u16()), "venue returned no credentials")
        })?;

        let resolved = self.sessions.resolve(cookie).await?;
        let previous = if resolved.fresh { None } else { Some(&resolved.id) };
        let (session_id, session) = self.sessions.link(previous, &wallet_address, l2).await?;

        Ok(LinkOutcome {
            session_id,
            wallet_address: session.wallet_address.unwrap_or_default(),
        })
    }
}
