//! Per-route middleware: admission control, then the read cache.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use coai_core::CoaiError;
use coai_engine::{Admission, CacheKey};

use crate::handlers::ApiError;
use crate::server::AppState;

const HEADER_X_FORWARDED_FOR: &str = "x-forwarded-for";
const HEADER_X_CACHE: &str = "x-cache";

/// Largest body kept in the response cache.
const MAX_CACHED_BODY: usize = 1024 * 1024;

/// First `X-Forwarded-For` address, else the peer address.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(HEADER_X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_id(request.headers(), peer);

    match state.services.rate_limiter.admit(&client) {
        Admission::Allowed => next.run(request).await,
        Admission::Rejected { .. } => {
            let config = state.services.rate_limiter.config();
            ApiError::from(CoaiError::RateLimitExceeded {
                limit: config.limit,
                window: config.window,
                retry_after: config.block,
            })
            .into_response()
        }
    }
}

/// Successful GET response as stored in the cache.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl CachedResponse {
    fn into_response(self, marker: &'static str) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        if let Some(ct) = self.content_type {
            headers.insert(CONTENT_TYPE, ct);
        }
        headers.insert(HEADER_X_CACHE, HeaderValue::from_static(marker));
        response
    }
}

/// Method, path and each query parameter as its own part, so parameter
/// order does not change the key. Repeated parameters keep their order.
fn cache_key(request: &Request) -> CacheKey {
    let uri = request.uri();
    let mut params: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for pair in uri.query().unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.entry(format!("query:{name}")).or_default().push(value);
    }
    let joined: Vec<(String, String)> = params
        .into_iter()
        .map(|(name, values)| (name, values.join("&")))
        .collect();

    CacheKey::from_parts(
        [("method", request.method().as_str()), ("path", uri.path())]
            .into_iter()
            .chain(joined.iter().map(|(n, v)| (n.as_str(), v.as_str()))),
    )
}

pub async fn response_cache(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache_key(&request);
    if let Some(hit) = state.services.cache.get(&key) {
        return hit.into_response("HIT");
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "response body failed while buffering");
            return (StatusCode::INTERNAL_SERVER_ERROR, Body::empty()).into_response();
        }
    };
    if bytes.len() > MAX_CACHED_BODY {
        debug!(bytes = bytes.len(), "response too large to cache");
        return Response::from_parts(parts, Body::from(bytes));
    }
    let stored = CachedResponse {
        status: parts.status,
        content_type: parts.headers.get(CONTENT_TYPE).cloned(),
        body: bytes,
    };
    state.services.cache.put(key, stored.clone());
    stored.into_response("MISS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_X_FORWARDED_FOR,
            HeaderValue::from_static(" 203.0.113.10 , 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(client_id(&headers, Some(peer)), "203.0.113.10");
    }

    #[test]
    fn peer_address_without_header() {
        let peer: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        assert_eq!(client_id(&HeaderMap::new(), Some(peer)), "192.0.2.7");
        assert_eq!(client_id(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn empty_header_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_X_FORWARDED_FOR, HeaderValue::from_static(" "));
        let peer: SocketAddr = "192.0.2.8:1".parse().unwrap();
        assert_eq!(client_id(&headers, Some(peer)), "192.0.2.8");
    }

    #[test]
    fn cache_key_includes_query() {
        let a = Request::builder()
            .uri("/api/usage/stats?days=7")
            .body(Body::empty())
            .unwrap();
        let b = Request::builder()
            .uri("/api/usage/stats?days=30")
            .body(Body::empty())
            .unwrap();
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    fn key_for(uri: &str) -> CacheKey {
        cache_key(&Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    #[test]
    fn cache_key_ignores_parameter_order() {
        assert_eq!(
            key_for("/api/usage/summary?date=2025-06-01&fmt=full"),
            key_for("/api/usage/summary?fmt=full&date=2025-06-01")
        );
        assert_ne!(key_for("/a?x=1&x=2"), key_for("/a?x=2&x=1"));
        assert_ne!(key_for("/a?x=1"), key_for("/b?x=1"));
        assert_eq!(key_for("/a?"), key_for("/a"));
    }
}
