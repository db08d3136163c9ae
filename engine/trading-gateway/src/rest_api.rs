//! REST API endpoints for the TradingGateway
//!
//! Every route except the link endpoint runs the reserved header guard
//! before anything else, including reading the body. The link endpoint
//! admits exactly the wallet's L1 headers.

use crate::builder::{BuilderSigner, SignRequest};
use crate::error::{ErrorBody, GatewayError};
use crate::gateway::{L1Headers, OrderGateway, LINK_HEADERS};
use crate::header_guard::{guard, guard_allowing};
use crate::relayer::RelayerProxy;
use crate::upstream::UpstreamResponse;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info};
use warp::http::header::{CONTENT_TYPE, SET_COOKIE};
use warp::http::{HeaderMap, HeaderValue, StatusCode};
use warp::hyper::body::Bytes;
use warp::Filter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkResponse {
    ok: bool,
    wallet_address: String,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

/// Value of cookie `name` in a `Cookie` header
pub fn cookie_value(header: Option<&str>, name: &str) -> Option<String> {
    header?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Relay an upstream response: its status, content type and body untouched
fn passthrough(upstream: UpstreamResponse) -> warp::reply::Response {
    let mut response = warp::reply::Response::new(upstream.body.into());
    *response.status_mut() = upstream.status;
    let content_type = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

fn with_set_cookie(mut response: warp::reply::Response, cookie: &str) -> warp::reply::Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().insert(SET_COOKIE, value);
        }
        Err(e) => error!("Could not encode session cookie: {}", e),
    }
    response
}

fn json_response<T: Serialize>(body: &T) -> warp::reply::Response {
    warp::reply::Reply::into_response(warp::reply::json(body))
}

/// Submit a wallet-signed order
pub async fn submit_order(
    cookie: Option<String>,
    body: Bytes,
    gateway: Arc<OrderGateway>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let response =
        gateway.submit(cookie.as_deref(), &body).await.map_err(warp::reject::custom)?;
    Ok(passthrough(response))
}

/// Builder headers for `{method, path, body}`, issued only to a linked session
pub async fn sign_builder(
    cookie: Option<String>,
    body: Bytes,
    gateway: Arc<OrderGateway>,
    signer: Arc<BuilderSigner>,
) -> Result<warp::reply::Response, warp::Rejection> {
    gateway.sessions().require_linked(cookie.as_deref()).await.map_err(warp::reject::custom)?;

    let request: SignRequest = serde_json::from_slice(&body).map_err(|e| {
        warp::reject::custom(GatewayError::malformed(format!("invalid sign request: {}", e)))
    })?;
    let headers = signer.headers_for(&request).map_err(warp::reject::custom)?;
    metrics::increment_counter!("gateway_builder_headers_total", "outcome" => "issued");
    Ok(json_response(&headers))
}

/// Session status, optionally checked against a wallet address
pub async fn session_status(
    cookie: Option<String>,
    params: HashMap<String, String>,
    gateway: Arc<OrderGateway>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let sessions = gateway.sessions();
    let status = sessions
        .status(cookie.as_deref(), params.get("address").map(String::as_str))
        .await
        .map_err(warp::reject::custom)?;

    let response = json_response(&status);
    if status.expired {
        return Ok(with_set_cookie(response, &sessions.clear_cookie()));
    }
    Ok(response)
}

/// Destroy the session; always succeeds
pub async fn logout(
    cookie: Option<String>,
    gateway: Arc<OrderGateway>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let sessions = gateway.sessions();
    sessions.destroy(cookie.as_deref()).await.map_err(warp::reject::custom)?;
    Ok(with_set_cookie(json_response(&OkResponse { ok: true }), &sessions.clear_cookie()))
}

/// Exchange the wallet's L1 proof for venue credentials held server-side
pub async fn link_session(
    cookie: Option<String>,
    headers: HeaderMap,
    gateway: Arc<OrderGateway>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let l1 = L1Headers::from_lookup(|name| {
        headers
            .get(name.to_ascii_lowercase().as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
    .map_err(warp::reject::custom)?;

    let outcome = gateway.link(cookie.as_deref(), l1).await.map_err(warp::reject::custom)?;
    info!("Session linked for wallet {}", outcome.wallet_address);

    let cookie = gateway.sessions().session_cookie(&outcome.session_id);
    let body = LinkResponse { ok: true, wallet_address: outcome.wallet_address };
    Ok(with_set_cookie(json_response(&body), &cookie))
}

/// Allow-listed relayer read
pub async fn relayer_read(
    tail: warp::path::Tail,
    query: Option<String>,
    relayer: Arc<RelayerProxy>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let response =
        relayer.read(tail.as_str(), query.as_deref()).await.map_err(warp::reject::custom)?;
    Ok(passthrough(response))
}

/// Relayer submission with the service token attached
pub async fn relayer_submit(
    content_type: Option<String>,
    body: Bytes,
    relayer: Arc<RelayerProxy>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let response =
        relayer.submit(body.to_vec(), content_type).await.map_err(warp::reject::custom)?;
    Ok(passthrough(response))
}

/// Turn any rejection into the `{ ok: false, error }` shape
pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (status, body) = if let Some(e) = err.find::<GatewayError>() {
        match e {
            GatewayError::Config(detail) | GatewayError::Session(detail) => {
                error!("Request failed: {}", detail)
            }
            other => debug!("Request rejected: {}", other),
        }
        (e.status_code(), e.body())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, plain_error("not found"))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, plain_error("method not allowed"))
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, plain_error("invalid query string"))
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, plain_error("internal error"))
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

fn plain_error(message: &str) -> ErrorBody {
    ErrorBody { ok: false, error: message.to_string(), upstream_status: None }
}

/// Create REST API routes
pub fn create_routes(
    gateway: Arc<OrderGateway>,
    relayer: Arc<RelayerProxy>,
    signer: Arc<BuilderSigner>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    let cookie_name = gateway.sessions().cookie_name().to_string();
    let session_cookie = warp::header::optional::<String>("cookie")
        .map(move |header: Option<String>| cookie_value(header.as_deref(), &cookie_name));
    let gateway_filter = warp::any().map(move || gateway.clone());
    let relayer_filter = warp::any().map(move || relayer.clone());
    let signer_filter = warp::any().map(move || signer.clone());
    let body = warp::body::bytes();

    // Order submission
    let orders = warp::path!("api" / "orders")
        .and(warp::post())
        .and(guard())
        .and(session_cookie.clone())
        .and(body.clone())
        .and(gateway_filter.clone())
        .and_then(submit_order);

    // Builder signature issuance
    let builder_sign = warp::path!("api" / "builder" / "sign")
        .and(warp::post())
        .and(guard())
        .and(session_cookie.clone())
        .and(body.clone())
        .and(gateway_filter.clone())
        .and(signer_filter)
        .and_then(sign_builder);

    // Session status
    let status = warp::path!("api" / "session" / "status")
        .and(warp::get())
        .and(guard())
        .and(session_cookie.clone())
        .and(warp::query::<HashMap<String, String>>())
        .and(gateway_filter.clone())
        .and_then(session_status);

    // Logout
    let logout_route = warp::path!("api" / "session" / "logout")
        .and(warp::post())
        .and(guard())
        .and(session_cookie.clone())
        .and(gateway_filter.clone())
        .and_then(logout);

    // Link: the only route that admits reserved headers, and only the L1 set
    let link = warp::path!("api" / "session" / "link")
        .and(warp::post())
        .and(guard_allowing(LINK_HEADERS))
        .and(session_cookie)
        .and(warp::header::headers_cloned())
        .and(gateway_filter)
        .and_then(link_session);

    // Relayer submission
    let relayer_submit_route = warp::path!("api" / "relayer" / "submit")
        .and(warp::post())
        .and(guard())
        .and(warp::header::optional::<String>("content-type"))
        .and(body)
        .and(relayer_filter.clone())
        .and_then(relayer_submit);

    // Relayer reads; the allow-list is applied by the proxy
    let raw_query = warp::query::raw().map(Some).or(warp::any().map(|| None)).unify();
    let relayer_read_route = warp::path("api")
        .and(warp::path("relayer"))
        .and(warp::get())
        .and(guard())
        .and(warp::path::tail())
        .and(raw_query)
        .and(relayer_filter)
        .and_then(relayer_read);

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(guard())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339()
            }))
        });

    // Combine all routes
    orders
        .or(builder_sign)
        .or(status)
        .or(logout_route)
        .or(link)
        .or(relayer_submit_route)
        .or(relayer_read_route)
        .or(health)
        .recover(handle_rejection)
}
