use super::{RateLimitStatus, RateLimiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Limits for one route group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub group: &'static str,
    pub max_requests: u32,
    pub window: Duration,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`.
    pub trust_forwarded: bool,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(group: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            group,
            max_requests,
            window,
            trust_forwarded: false,
        }
    }

    #[must_use]
    pub const fn auth() -> Self {
        Self::new("auth", 5, Duration::from_secs(60))
    }

    #[must_use]
    pub const fn user() -> Self {
        Self::new("user", 30, Duration::from_secs(60))
    }

    #[must_use]
    pub const fn admin() -> Self {
        Self::new("admin", 60, Duration::from_secs(60))
    }

    #[must_use]
    pub const fn with_trust_forwarded(mut self, trust_forwarded: bool) -> Self {
        self.trust_forwarded = trust_forwarded;
        self
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<dyn RateLimiter>,
    policy: RateLimitPolicy,
}

impl RateLimitState {
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }
}

/// Client identity for counting.
///
/// Forwarding headers are only honoured when the deployment sits behind a
/// trusted proxy; otherwise any client could pick its own bucket.
#[must_use]
pub fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> String {
    if trust_forwarded {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn apply_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let reset_at = Utc::now().timestamp()
        + i64::try_from(status.reset_in.as_secs()).unwrap_or(i64::MAX / 2);
    headers.insert(LIMIT_HEADER, HeaderValue::from(status.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(status.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(reset_at));
}

/// axum middleware: count the request, reject with 429 over the limit, and
/// fail closed with 500 when the counter store is unavailable.
pub async fn enforce(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer, state.policy.trust_forwarded);
    let policy = &state.policy;

    let status = match state
        .limiter
        .check(policy.group, &identity, policy.max_requests, policy.window)
        .await
    {
        Ok(status) => status,
        Err(err) => {
            error!(group = policy.group, "Rate limiter unavailable: {err:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    if !status.allowed {
        warn!(group = policy.group, client = %identity, "Rate limit exceeded");
        let mut response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        apply_headers(response.headers_mut(), &status);
        return response;
    }

    debug!(group = policy.group, remaining = status.remaining, "Rate limit check passed");
    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &status);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::MemoryRateLimiter;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn identity_ignores_forwarded_headers_unless_trusted() {
        let peer: SocketAddr = "192.0.2.10:4000".parse().expect("addr");
        let map = headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1")]);
        assert_eq!(client_identity(&map, Some(peer), false), "192.0.2.10");
        assert_eq!(client_identity(&map, Some(peer), true), "203.0.113.5");
    }

    #[test]
    fn identity_falls_back_to_real_ip_then_peer() {
        let peer: SocketAddr = "192.0.2.10:4000".parse().expect("addr");
        let map = headers(&[("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_identity(&map, Some(peer), true), "198.51.100.7");
        assert_eq!(client_identity(&HeaderMap::new(), Some(peer), true), "192.0.2.10");
        assert_eq!(client_identity(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn group_defaults_match_routes() {
        assert_eq!(RateLimitPolicy::auth().max_requests, 5);
        assert_eq!(RateLimitPolicy::user().max_requests, 30);
        assert_eq!(RateLimitPolicy::admin().max_requests, 60);
        assert!(RateLimitPolicy::auth().with_trust_forwarded(true).trust_forwarded);
    }

    #[tokio::test]
    async fn middleware_sets_headers_and_denies_over_limit() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::new());
        let policy = RateLimitPolicy::new("test", 2, Duration::from_secs(60)).with_trust_forwarded(true);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(RateLimitState::new(limiter, policy), enforce));

        let request = || {
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .expect("request")
        };

        let first = app.clone().oneshot(request()).await.expect("response");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[LIMIT_HEADER], "2");
        assert_eq!(first.headers()[REMAINING_HEADER], "1");
        assert!(first.headers().contains_key(RESET_HEADER));

        let _ = app.clone().oneshot(request()).await.expect("response");
        let third = app.oneshot(request()).await.expect("response");
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third.headers()[REMAINING_HEADER], "0");
    }
}
