use super::types::UpdateProfileRequest;
use crate::{
    auth::{principal, AuthError, AuthService},
    db::{users, users::User, RequestTx},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::{info, instrument};

pub const MAX_NAME_LENGTH: usize = 100;

/// Trimmed name, non-empty and at most [`MAX_NAME_LENGTH`] characters.
fn valid_name<'a>(field: &str, value: &'a str) -> Result<&'a str, AuthError> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > MAX_NAME_LENGTH {
        return Err(AuthError::Validation(format!(
            "{field} must be between 1 and {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(value)
}

#[utoipa::path(
    get,
    path = "/api/v1/user/profile",
    responses(
        (status = 200, description = "Profile of the calling user", body = User),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "User is disabled"),
    ),
    security(("bearer" = [])),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn get_profile(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
) -> Response {
    let result = async {
        let mut conn = tx.conn().await?;
        principal::require_user(&headers, auth.tokens(), &mut conn).await
    }
    .await;

    match result {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = User),
        (status = 400, description = "Missing payload or invalid names"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "User is disabled"),
    ),
    security(("bearer" = [])),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn update_profile(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    payload: Option<Json<UpdateProfileRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let result = async {
        let first_name = valid_name("first_name", &request.first_name)?;
        let last_name = valid_name("last_name", &request.last_name)?;

        let mut conn = tx.conn().await?;
        let user = principal::require_user(&headers, auth.tokens(), &mut conn).await?;
        let updated = users::update_profile(&mut conn, user.id, first_name, last_name)
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(user_id = %updated.id, "Profile updated");
        Ok::<_, AuthError>(updated)
    }
    .await;

    match result {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => err.into_response(),
    }
}
