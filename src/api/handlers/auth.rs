use super::types::{
    AccessTokenResponse, AdminLoginRequest, RequestOtpRequest, RequestOtpResponse,
    VerifyOtpRequest,
};
use crate::{
    auth::{AuthError, AuthService},
    db::RequestTx,
    token::{extract_bearer_token, Audience},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, instrument};

fn missing_payload() -> Response {
    (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response()
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/request-otp",
    request_body = RequestOtpRequest,
    responses(
        (status = 200, description = "Code sent, login session opened", body = RequestOtpResponse),
        (status = 400, description = "Missing payload or malformed phone number"),
        (status = 403, description = "User is disabled"),
        (status = 429, description = "Code requested too recently or too often"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn request_otp(
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    payload: Option<Json<RequestOtpRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let result = async {
        let mut conn = tx.conn().await?;
        auth.request_otp(&mut conn, request.phone_number.trim()).await
    }
    .await;

    match result {
        Ok(token) => (
            StatusCode::OK,
            Json(RequestOtpResponse {
                token: token.into_inner(),
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted, access token issued", body = AccessTokenResponse),
        (status = 400, description = "Missing payload or malformed code"),
        (status = 401, description = "Unknown session, wrong code or too many attempts"),
        (status = 403, description = "User is disabled"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn verify_otp(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Response {
    let Some(session_token) = extract_bearer_token(&headers) else {
        debug!("Missing login session token");
        return AuthError::SessionNotFound.into_response();
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let result = async {
        let mut conn = tx.conn().await?;
        let user = auth
            .verify_otp(&mut conn, session_token, request.code.trim())
            .await?;
        Ok::<_, AuthError>(auth.tokens().generate(user.id, Audience::User)?)
    }
    .await;

    match result {
        Ok(token) => (StatusCode::OK, Json(AccessTokenResponse { token })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/admin",
    request_body = AdminLoginRequest,
    responses(
        (status = 200, description = "Credentials accepted, access token issued", body = AccessTokenResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid username or password"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn admin_login(
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    payload: Option<Json<AdminLoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let result = async {
        let mut conn = tx.conn().await?;
        let admin = auth
            .admin_login(&mut conn, request.username.trim(), &request.password)
            .await?;
        Ok::<_, AuthError>(auth.tokens().generate(admin.id, Audience::Admin)?)
    }
    .await;

    match result {
        Ok(token) => (StatusCode::OK, Json(AccessTokenResponse { token })).into_response(),
        Err(err) => err.into_response(),
    }
}
