//! Request pipeline: session attachment -> CORS -> CSRF guard -> cache
//! read-through -> normalize -> aggregate -> cache write-through, with
//! uniform error translation at the boundary.

use crate::{
    cache::{self, ResponseCache},
    config::Config,
    csrf::{CsrfGuard, CSRF_TOKEN_HEADER},
    errors::GatewayError,
    normalize::{self, LookupTarget},
    record::WhoisRecord,
    session::{self, SessionId},
    whois::WhoisAggregator,
};
use axum::{
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub aggregator: Arc<WhoisAggregator>,
    pub cache: Arc<ResponseCache>,
    pub csrf: Arc<CsrfGuard>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            aggregator: Arc::new(WhoisAggregator::new(config.clone())),
            cache: Arc::new(ResponseCache::new(config.cache_max_entries)),
            csrf: Arc::new(CsrfGuard::new(&config.session_secret)),
            config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/api/ip", get(self_ip))
        .route("/api/whois/:ip", get(ip_whois))
        .route("/api/domain-whois", get(domain_whois))
        .route("/api/csrf-token", get(csrf_token))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors)
                .layer(middleware::from_fn(session::attach_session))
                .layer(middleware::from_fn_with_state(state.clone(), csrf_protect))
                .into_inner(),
        )
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(CSRF_TOKEN_HEADER)])
}

/// Reject mutating requests without a valid session-bound token. Safe
/// methods and the token issuance endpoint itself pass through untouched.
async fn csrf_protect(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if CsrfGuard::is_safe_method(request.method()) || request.uri().path() == "/api/csrf-token" {
        return next.run(request).await;
    }

    let session_id = match request.extensions().get::<SessionId>() {
        Some(SessionId(id)) => id.clone(),
        None => return GatewayError::CsrfValidation.into_response(),
    };

    let presented = request
        .headers()
        .get(CSRF_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    match state.csrf.validate(&session_id, presented.as_deref()).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct DomainQuery {
    domain: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

/// `GET /api/ip` - the caller's own address, per-client cached for seconds.
async fn self_ip(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<Value>, GatewayError> {
    let ip = client_ip(&headers, connect_info.map(|info| info.0));

    let key = cache::self_ip_key(&ip);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let body = json!({ "ip": ip });
    state
        .cache
        .put(key, body.clone(), Duration::from_secs(state.config.self_ip_ttl_seconds))
        .await;

    Ok(Json(body))
}

/// `GET /api/whois/:ip` - raw merged WHOIS text for an address.
async fn ip_whois(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    // The normalizer passes non-IPv4 text (IPv6, hostnames) through to the
    // upstream provider unvalidated; `lookup_ip` handles `::1`/`localhost`.
    let target = normalize::classify(&ip)?;
    let value = target.value().to_string();

    let key = cache::ip_whois_key(&value);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let record = state
        .aggregator
        .lookup_ip(&value)
        .await
        .map_err(|e| note_upstream_failure(&value, e))?;
    let body = json!({ "raw": record.raw });

    state
        .cache
        .put(key, body.clone(), Duration::from_secs(state.config.ip_whois_ttl_seconds))
        .await;

    Ok(Json(body))
}

/// `GET /api/domain-whois?domain=<input>` - structured merged record.
async fn domain_whois(
    State(state): State<AppState>,
    Query(params): Query<DomainQuery>,
) -> Result<Json<Value>, GatewayError> {
    let input = params
        .domain
        .ok_or_else(|| GatewayError::InvalidInput("missing domain parameter".to_string()))?;

    let target = normalize::classify(&input)?;
    let value = target.value().to_string();

    let key = cache::domain_whois_key(&value);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let record = lookup(&state.aggregator, &target).await?;
    let body = json!({ "domain": value, "whois": record.fields });

    state
        .cache
        .put(
            key,
            body.clone(),
            Duration::from_secs(state.config.domain_whois_ttl_seconds),
        )
        .await;

    Ok(Json(body))
}

/// `GET /api/csrf-token` - issue (or reissue) the session's token.
async fn csrf_token(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
) -> Json<Value> {
    let token = state.csrf.issue(&session_id).await;
    Json(json!({ "csrfToken": token }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.config.start_time.elapsed().as_secs(),
    })
}

async fn lookup(
    aggregator: &WhoisAggregator,
    target: &LookupTarget,
) -> Result<WhoisRecord, GatewayError> {
    let result = match target {
        LookupTarget::Ip(ip) => aggregator.lookup_ip(ip).await,
        LookupTarget::Domain(domain) => aggregator.lookup_domain(domain).await,
    };

    result.map_err(|e| note_upstream_failure(target.value(), e))
}

/// Upstream detail is logged here and never reaches the client body.
fn note_upstream_failure(target: &str, e: GatewayError) -> GatewayError {
    warn!("WHOIS lookup failed for {}: {}", target, e);
    e
}

/// First entry of `x-forwarded-for` when present, else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| {
            peer.map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = Arc::new(Config::load().unwrap());
        build_router(AppState::new(config))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn self_ip_prefers_forwarding_header() {
        let request = Request::builder()
            .uri("/api/ip")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(body_json(response).await, json!({ "ip": "203.0.113.7" }));
    }

    #[tokio::test]
    async fn loopback_whois_returns_sentinel_without_upstream() {
        let request = Request::builder()
            .uri("/api/whois/127.0.0.1")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);

        let body = body_json(response).await;
        assert_eq!(
            body["raw"],
            "This is a localhost address. No WHOIS data exists for local interfaces."
        );
    }

    #[tokio::test]
    async fn localhost_aliases_also_get_the_sentinel() {
        for target in ["::1", "localhost"] {
            let request = Request::builder()
                .uri(format!("/api/whois/{}", target))
                .body(Body::empty())
                .unwrap();

            let response = test_router().oneshot(request).await.unwrap();
            assert_eq!(response.status(), 200);

            let body = body_json(response).await;
            assert!(body["raw"]
                .as_str()
                .unwrap()
                .starts_with("This is a localhost address."));
        }
    }

    #[tokio::test]
    async fn missing_domain_parameter_is_a_400() {
        let request = Request::builder()
            .uri("/api/domain-whois")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(body_json(response).await, json!({ "error": "Invalid domain" }));
    }

    #[tokio::test]
    async fn empty_domain_parameter_is_a_400() {
        let request = Request::builder()
            .uri("/api/domain-whois?domain=")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn csrf_token_endpoint_issues_a_token_and_a_session() {
        let request = Request::builder()
            .uri("/api/csrf-token")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key(header::SET_COOKIE));

        let body = body_json(response).await;
        let token = body["csrfToken"].as_str().unwrap();
        assert_eq!(token.len(), 64);
    }

    #[tokio::test]
    async fn mutating_request_without_token_is_rejected_before_routing() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/domain-whois")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 403);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Invalid CSRF token" })
        );
    }

    #[tokio::test]
    async fn mutating_request_with_foreign_session_token_is_rejected() {
        let router = test_router();

        // Issue a token for one session...
        let issue = Request::builder()
            .uri("/api/csrf-token")
            .header(header::COOKIE, "whois_gateway_sid=session-a")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(issue).await.unwrap();
        let token = body_json(response).await["csrfToken"]
            .as_str()
            .unwrap()
            .to_string();

        // ...then present it under a different session.
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/domain-whois")
            .header(header::COOKIE, "whois_gateway_sid=session-b")
            .header(CSRF_TOKEN_HEADER, &token)
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), 403);
    }

    #[tokio::test]
    async fn valid_token_clears_the_guard() {
        let router = test_router();

        let issue = Request::builder()
            .uri("/api/csrf-token")
            .header(header::COOKIE, "whois_gateway_sid=session-a")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(issue).await.unwrap();
        let token = body_json(response).await["csrfToken"]
            .as_str()
            .unwrap()
            .to_string();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/domain-whois")
            .header(header::COOKIE, "whois_gateway_sid=session-a")
            .header(CSRF_TOKEN_HEADER, &token)
            .body(Body::empty())
            .unwrap();

        // Past the guard; the GET-only route answers 405, not 403.
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), 405);
    }

    #[tokio::test]
    async fn self_ip_answers_are_cached_per_client() {
        let router = test_router();

        for _ in 0..2 {
            let request = Request::builder()
                .uri("/api/ip")
                .header("x-forwarded-for", "198.51.100.4")
                .body(Body::empty())
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(body_json(response).await, json!({ "ip": "198.51.100.4" }));
        }

        let request = Request::builder()
            .uri("/api/ip")
            .header("x-forwarded-for", "198.51.100.5")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(body_json(response).await, json!({ "ip": "198.51.100.5" }));
    }

    #[tokio::test]
    async fn health_reports_version() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[test]
    fn client_ip_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.9:54321".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.9");
    }
}
