//! Request/response types for the API.

use crate::db::users::{SortOrder, User, UserSearch, UserStatus};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RequestOtpRequest {
    /// E.164 phone number, e.g. `+14155550123`.
    pub phone_number: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RequestOtpResponse {
    /// Login session handle; send it back as `Authorization: Bearer` to verify.
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccessTokenResponse {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdateProfileRequest {
    pub first_name: String,
    pub last_name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    pub id: Option<Uuid>,
    pub phone_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: Option<UserStatus>,
    /// Page size, default 10, max 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// One of `created_at`, `updated_at`, `phone_number`, `first_name`,
    /// `last_name`, `status`.
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl From<ListUsersQuery> for UserSearch {
    fn from(query: ListUsersQuery) -> Self {
        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            id: query.id,
            phone_number: non_empty(query.phone_number),
            first_name: non_empty(query.first_name),
            last_name: non_empty(query.last_name),
            status: query.status,
            limit: query.limit,
            offset: query.offset,
            sort_by: non_empty(query.sort_by),
            sort_order: query.sort_order.unwrap_or_default(),
        }
    }
}
