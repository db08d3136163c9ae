//! Rejection of inbound requests that carry reserved venue headers
//!
//! `POLY_*` headers are produced exclusively by this service. Seeing one on
//! an inbound request means a client is trying to supply its own venue or
//! builder credentials, so the request is refused before any other work.

use crate::error::GatewayError;
use crate::RESERVED_HEADER_PREFIX;
use tracing::warn;
use warp::http::HeaderMap;
use warp::Filter;

/// Whether a header name carries the reserved prefix, ignoring ASCII case
pub fn is_reserved_header(name: &str) -> bool {
    name.len() >= RESERVED_HEADER_PREFIX.len()
        && name.as_bytes()[..RESERVED_HEADER_PREFIX.len()]
            .eq_ignore_ascii_case(RESERVED_HEADER_PREFIX.as_bytes())
}

/// First reserved header name found among `names`, skipping any in `allowed`
pub fn find_reserved<'a, I>(names: I, allowed: &[&str]) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().find(|name| {
        is_reserved_header(name) && !allowed.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}

/// Check a request's headers, failing with `SpoofedHeader` on the first hit
pub fn check_headers(headers: &HeaderMap, allowed: &[&str]) -> Result<(), GatewayError> {
    match find_reserved(headers.keys().map(|k| k.as_str()), allowed) {
        Some(name) => {
            warn!("Rejecting request carrying reserved header {}", name);
            metrics::increment_counter!("gateway_spoofed_headers_total");
            Err(GatewayError::SpoofedHeader(name.to_string()))
        }
        None => Ok(()),
    }
}

/// Filter applied to every guarded route
pub fn guard() -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    guard_allowing(&[])
}

/// Guard that lets an explicit set of reserved names through
pub fn guard_allowing(
    allowed: &'static [&'static str],
) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::header::headers_cloned()
        .and_then(move |headers: HeaderMap| async move {
            check_headers(&headers, allowed).map_err(warp::reject::custom)
        })
        .untuple_one()
}
