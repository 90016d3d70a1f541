//! End-to-end login flows through the HTTP router with real Postgres and
//! Redis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use otpgate::{
    api::{self, ApiState},
    auth::{password, AuthService, CodeSender},
    db::{
        self,
        admins::{self, AdminRole},
        otp::OtpPolicy,
    },
    rate_limit::RedisRateLimiter,
    session::{connect_redis, RedisSessionStore},
    settings::{self, Settings},
    token::TokenService,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use test_support::{postgres::PostgresContainer, redis::RedisContainer, runtime, TestNetwork};
use tower::ServiceExt;

/// Keeps delivered codes so the test can play the phone.
#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl CapturingSender {
    fn last_code(&self, phone: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(to, _)| to == phone)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl CodeSender for CapturingSender {
    async fn send(&self, phone_number: &str, code: &str) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("sender lock poisoned"))?
            .push((phone_number.to_string(), code.to_string()));
        Ok(())
    }
}

struct TestApp {
    _postgres: PostgresContainer,
    _redis: RedisContainer,
    pool: PgPool,
    router: Router,
    sender: Arc<CapturingSender>,
}

impl TestApp {
    async fn start() -> Result<Self> {
        let network = TestNetwork::new("otpgate-flow");
        let postgres = PostgresContainer::start(network.name()).await?;
        let redis = RedisContainer::start(network.name()).await?;
        postgres.wait_until_ready().await?;
        redis.wait_until_ready().await?;

        let pool = db::connect(&postgres.dsn()).await?;
        db::apply_schema(&pool).await?;
        assert!(settings::init_defaults(&pool).await?);
        assert!(!settings::init_defaults(&pool).await?);
        let settings = Arc::new(Settings::load(&pool).await?);

        let conn = connect_redis(&redis.url()).await?;
        let sender = Arc::new(CapturingSender::default());
        let auth = AuthService::new(
            Arc::new(RedisSessionStore::new(conn.clone())),
            sender.clone(),
            TokenService::new(settings),
            OtpPolicy::default(),
        );

        let state = ApiState {
            pool: pool.clone(),
            redis: conn.clone(),
            auth,
            limiter: Arc::new(RedisRateLimiter::new(conn)),
            trust_forwarded_headers: true,
            request_timeout: Duration::from_secs(30),
        };

        Ok(Self {
            _postgres: postgres,
            _redis: redis,
            pool,
            router: api::router(&state),
            sender,
        })
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        client: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", client);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        Ok((status, value))
    }

    async fn request_otp(&self, client: &str, phone: &str) -> Result<(StatusCode, Value)> {
        self.send(
            "POST",
            "/api/v1/auth/request-otp",
            client,
            None,
            Some(json!({ "phone_number": phone })),
        )
        .await
    }

    async fn verify_otp(&self, client: &str, session: &str, code: &str) -> Result<(StatusCode, Value)> {
        self.send(
            "POST",
            "/api/v1/auth/verify-otp",
            client,
            Some(session),
            Some(json!({ "code": code })),
        )
        .await
    }
}

fn token(body: &Value) -> Result<String> {
    body["token"]
        .as_str()
        .map(str::to_string)
        .context("response has no token")
}

#[tokio::test]
async fn otp_login_end_to_end() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let app = TestApp::start().await?;
    let client = "203.0.113.10";
    let phone = "+14155550123";

    let (status, body) = app.request_otp(client, phone).await?;
    assert_eq!(status, StatusCode::OK);
    let session = token(&body)?;
    let code = app.sender.last_code(phone).context("code was not sent")?;
    assert!(!body.to_string().contains(&code));

    let (status, body) = app.verify_otp(client, &session, &code).await?;
    assert_eq!(status, StatusCode::OK);
    let access = token(&body)?;

    // The session is resolved; the same code is refused.
    let (status, body) = app.verify_otp(client, &session, &code).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, Value::String("invalid code".to_string()));

    let used: bool = sqlx::query_scalar(
        "SELECT used_at IS NOT NULL FROM user_otps o JOIN users u ON u.id = o.user_id WHERE u.phone_number = $1",
    )
    .bind(phone)
    .fetch_one(&app.pool)
    .await?;
    assert!(used);

    let (status, body) = app
        .send("GET", "/api/v1/user/profile", client, Some(&access), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phone_number"], phone);
    assert_eq!(body["status"], "active");

    let (status, body) = app
        .send(
            "PUT",
            "/api/v1/user/profile",
            client,
            Some(&access),
            Some(json!({ "first_name": " Ada ", "last_name": "Lovelace" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["first_name"], "Ada");
    assert_eq!(body["last_name"], "Lovelace");

    // A session token is not an access token.
    let (status, _) = app
        .send("GET", "/api/v1/user/profile", client, Some(&session), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn wrong_codes_exhaust_the_session() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let app = TestApp::start().await?;
    let client = "203.0.113.20";
    let phone = "+14155550124";

    let (status, body) = app.request_otp(client, phone).await?;
    assert_eq!(status, StatusCode::OK);
    let session = token(&body)?;
    let code = app.sender.last_code(phone).context("code was not sent")?;
    let wrong = if code == "ZZZZZZ" { "YYYYYY" } else { "ZZZZZZ" };

    for _ in 0..3 {
        let (status, body) = app.verify_otp(client, &session, wrong).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, Value::String("invalid code".to_string()));
    }

    let (status, body) = app.verify_otp(client, &session, &code).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        Value::String("too many attempts, request a new code".to_string())
    );

    // Sixth auth request from this client within the window.
    let (status, _) = app.verify_otp(client, &session, &code).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn request_otp_validation_and_throttling() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let app = TestApp::start().await?;

    let (status, _) = app
        .send("POST", "/api/v1/auth/request-otp", "198.51.100.1", None, None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.request_otp("198.51.100.2", "0044 20 7946 0000").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.request_otp("198.51.100.3", "+442079460000").await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.request_otp("198.51.100.4", "+442079460000").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let codes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_otps")
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(codes, 1);

    let (status, _) = app
        .verify_otp("198.51.100.5", "not-a-session", "ABC123")
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn rate_limit_headers_and_denial() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let app = TestApp::start().await?;
    let client = "192.0.2.50";

    for _ in 0..5 {
        let (status, _) = app.verify_otp(client, "unknown", "ABC123").await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/verify-otp")
        .header("x-forwarded-for", client)
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("0")
    );
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-limit")
            .and_then(|v| v.to_str().ok()),
        Some("5")
    );
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    Ok(())
}

#[tokio::test]
async fn admin_manages_users() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let app = TestApp::start().await?;
    {
        let mut conn = app.pool.acquire().await?;
        admins::create(
            &mut conn,
            "root",
            AdminRole::Sudo,
            &password::hash_password("correct horse")?,
        )
        .await?;
        admins::create(
            &mut conn,
            "viewer",
            AdminRole::Visitor,
            &password::hash_password("battery staple")?,
        )
        .await?;
    }

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/auth/admin",
            "192.0.2.60",
            None,
            Some(json!({ "username": "root", "password": "wrong" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/auth/admin",
            "192.0.2.60",
            None,
            Some(json!({ "username": "root", "password": "correct horse" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let sudo = token(&body)?;

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/auth/admin",
            "192.0.2.60",
            None,
            Some(json!({ "username": "viewer", "password": "battery staple" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let visitor = token(&body)?;

    // A user logs in.
    let phone = "+14155550125";
    let (_, body) = app.request_otp("192.0.2.61", phone).await?;
    let session = token(&body)?;
    let code = app.sender.last_code(phone).context("code was not sent")?;
    let (_, body) = app.verify_otp("192.0.2.61", &session, &code).await?;
    let access = token(&body)?;

    // Admin tokens do not work on user routes and vice versa.
    let (status, _) = app
        .send("GET", "/api/v1/user/profile", "192.0.2.62", Some(&sudo), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .send("GET", "/api/v1/admin/profile", "192.0.2.62", Some(&access), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send("GET", "/api/v1/admin/profile", "192.0.2.62", Some(&sudo), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "root");
    assert_eq!(body["role"], "sudo");
    assert!(body.get("hashed_password").is_none());

    let (status, body) = app
        .send(
            "GET",
            "/api/v1/admin/users?phone_number=5550125&sort_by=phone_number&sort_order=asc",
            "192.0.2.62",
            Some(&sudo),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["limit"], 10);
    let user_id = body["users"][0]["id"]
        .as_str()
        .context("user id")?
        .to_string();

    let (status, body) = app
        .send(
            "GET",
            &format!("/api/v1/admin/user/{user_id}"),
            "192.0.2.62",
            Some(&visitor),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phone_number"], phone);

    let status_uri = format!("/api/v1/admin/user/{user_id}/status");
    let (status, _) = app
        .send(
            "PATCH",
            &status_uri,
            "192.0.2.62",
            Some(&visitor),
            Some(json!({ "status": "disabled" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            "PATCH",
            &status_uri,
            "192.0.2.62",
            Some(&sudo),
            Some(json!({ "status": "disabled" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disabled");

    let (status, _) = app
        .send("GET", "/api/v1/user/profile", "192.0.2.63", Some(&access), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            "GET",
            &format!("/api/v1/admin/user/{}", uuid::Uuid::new_v4()),
            "192.0.2.62",
            Some(&sudo),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A password reset revokes every token issued before it.
    {
        let mut conn = app.pool.acquire().await?;
        assert!(
            admins::reset_password(&mut conn, "root", &password::hash_password("new horse")?)
                .await?
        );
    }
    let (status, _) = app
        .send("GET", "/api/v1/admin/profile", "192.0.2.62", Some(&sudo), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send("GET", "/api/v1/admin/profile", "192.0.2.62", Some(&visitor), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_reports_dependencies() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let app = TestApp::start().await?;
    let (status, body) = app.send("GET", "/health", "192.0.2.70", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
    assert_eq!(body["redis"], "ok");
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));

    let (status, body) = app
        .send("GET", "/api-docs/openapi.json", "192.0.2.70", None, None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/auth/request-otp"].is_object());
    Ok(())
}
