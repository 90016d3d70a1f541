use super::types::{ListUsersQuery, UpdateUserStatusRequest, UserListResponse};
use crate::{
    auth::{principal, AuthError, AuthService},
    db::{
        admins::Admin,
        users::{self, User, UserSearch},
        RequestTx,
    },
};
use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::{info, instrument};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/admin/profile",
    responses(
        (status = 200, description = "Profile of the calling admin", body = Admin),
        (status = 401, description = "Missing or invalid access token"),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn profile(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
) -> Response {
    let result = async {
        let mut conn = tx.conn().await?;
        principal::require_admin(&headers, auth.tokens(), &mut conn).await
    }
    .await;

    match result {
        Ok(admin) => (StatusCode::OK, Json(admin)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "One page of matching users", body = UserListResponse),
        (status = 400, description = "Malformed query"),
        (status = 401, description = "Missing or invalid access token"),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn list_users(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    Query(query): Query<ListUsersQuery>,
) -> Response {
    let search = UserSearch::from(query);

    let result = async {
        let mut conn = tx.conn().await?;
        principal::require_admin(&headers, auth.tokens(), &mut conn).await?;
        let (users, total) = users::search(&mut conn, &search).await?;
        Ok::<_, AuthError>(UserListResponse {
            users,
            total,
            limit: search.page_size(),
            offset: search.page_offset(),
        })
    }
    .await;

    match result {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/user/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "The user", body = User),
        (status = 401, description = "Missing or invalid access token"),
        (status = 404, description = "No such user"),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all, fields(user_id = %id))]
pub async fn get_user(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    Path(id): Path<Uuid>,
) -> Response {
    let result = async {
        let mut conn = tx.conn().await?;
        principal::require_admin(&headers, auth.tokens(), &mut conn).await?;
        users::get_by_id(&mut conn, id)
            .await?
            .ok_or(AuthError::NotFound)
    }
    .await;

    match result {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    patch,
    path = "/api/v1/admin/user/{id}/status",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = User),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "Admin role may not change users"),
        (status = 404, description = "No such user"),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all, fields(user_id = %id))]
pub async fn update_user_status(
    headers: HeaderMap,
    Extension(auth): Extension<AuthService>,
    Extension(tx): Extension<RequestTx>,
    Path(id): Path<Uuid>,
    payload: Option<Json<UpdateUserStatusRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let result = async {
        let mut conn = tx.conn().await?;
        let admin = principal::require_admin(&headers, auth.tokens(), &mut conn).await?;
        principal::require_sudo(&admin)?;
        let user = users::set_status(&mut conn, id, request.status)
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(admin_id = %admin.id, status = ?user.status, "User status changed");
        Ok::<_, AuthError>(user)
    }
    .await;

    match result {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => err.into_response(),
    }
}
