use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    redis: String,
}

fn status_label(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}

async fn database_ok(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    match pool.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    false
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            false
        }
    }
}

async fn redis_ok(mut conn: ConnectionManager) -> bool {
    let span = info_span!("redis.command", db.system = "redis", db.operation = "PING");
    match redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .instrument(span)
        .await
    {
        Ok(_) => true,
        Err(error) => {
            error!("Failed to ping redis: {}", error);
            false
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database and Redis are healthy", body = Health),
        (status = 503, description = "Database or Redis is unhealthy", body = Health)
    ),
    tag = "health"
)]
pub async fn health(
    method: Method,
    Extension(pool): Extension<PgPool>,
    Extension(redis): Extension<ConnectionManager>,
) -> impl IntoResponse {
    let (database, redis) = tokio::join!(database_ok(&pool), redis_ok(redis));

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status_label(database),
        redis: status_label(redis),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    debug!(database, redis, "Health checked");

    if database && redis {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
