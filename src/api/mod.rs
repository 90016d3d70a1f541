use crate::{
    api::handlers::{admin, auth, health, root, user},
    auth::{AuthService, LogCodeSender},
    db::{self, otp::OtpPolicy, transactional},
    rate_limit::{enforce, RateLimitPolicy, RateLimitState, RateLimiter, RedisRateLimiter},
    session::{connect_redis, RedisSessionStore},
    settings::{self, Settings},
    token::TokenService,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Extension, Router,
};
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::{openapi, ApiDoc};

/// Everything the router needs.
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub redis: ConnectionManager,
    pub auth: AuthService,
    pub limiter: Arc<dyn RateLimiter>,
    pub trust_forwarded_headers: bool,
    pub request_timeout: Duration,
}

/// Server configuration collected from the command line.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: SecretString,
    pub redis_url: SecretString,
    pub request_timeout: Duration,
    pub trust_forwarded_headers: bool,
    pub otp_policy: OtpPolicy,
}

/// Build the application router.
///
/// Each `/api/v1` group runs its handlers inside a request transaction; the
/// group's rate limit is checked once the transaction is open.
pub fn router(state: &ApiState) -> Router {
    let transaction = || from_fn_with_state(state.pool.clone(), transactional);
    let rate_limit = |policy: RateLimitPolicy| {
        from_fn_with_state(
            RateLimitState::new(
                state.limiter.clone(),
                policy.with_trust_forwarded(state.trust_forwarded_headers),
            ),
            enforce,
        )
    };

    let auth_routes = Router::new()
        .route("/request-otp", post(auth::request_otp))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/admin", post(auth::admin_login))
        .route_layer(rate_limit(RateLimitPolicy::auth()))
        .route_layer(transaction());

    let user_routes = Router::new()
        .route(
            "/profile",
            get(user::get_profile).put(user::update_profile),
        )
        .route_layer(rate_limit(RateLimitPolicy::user()))
        .route_layer(transaction());

    let admin_routes = Router::new()
        .route("/profile", get(admin::profile))
        .route("/users", get(admin::list_users))
        .route("/user/:id", get(admin::get_user))
        .route("/user/:id/status", patch(admin::update_user_status))
        .route_layer(rate_limit(RateLimitPolicy::admin()))
        .route_layer(transaction());

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/user", user_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(TimeoutLayer::new(state.request_timeout))
                .layer(Extension(state.auth.clone()))
                .layer(Extension(state.redis.clone()))
                .layer(Extension(state.pool.clone())),
        )
}

/// Connect to Postgres and Redis, load settings and serve until SIGINT or
/// SIGTERM.
///
/// # Errors
/// Returns an error if a backing store is unreachable, settings were never
/// initialized, or the listener cannot bind.
pub async fn new(config: ServerConfig) -> Result<()> {
    let pool = db::connect(config.dsn.expose_secret()).await?;
    let redis = connect_redis(config.redis_url.expose_secret()).await?;

    let settings = Arc::new(Settings::load(&pool).await?);
    #[cfg(unix)]
    settings::spawn_reload_on_sighup(settings.clone(), pool.clone())?;

    let auth = AuthService::new(
        Arc::new(RedisSessionStore::new(redis.clone())),
        Arc::new(LogCodeSender),
        TokenService::new(settings),
        config.otp_policy,
    );

    let state = ApiState {
        pool,
        redis: redis.clone(),
        auth,
        limiter: Arc::new(RedisRateLimiter::new(redis)),
        trust_forwarded_headers: config.trust_forwarded_headers,
        request_timeout: config.request_timeout,
    };

    serve(config.port, &state).await
}

/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(port: u16, state: &ApiState) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gracefully shutdown");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
