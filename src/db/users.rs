//! End-user accounts keyed by phone number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{info_span, instrument, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown user status {0}")]
pub struct UnknownUserStatus(i16);

impl TryFrom<i16> for UserStatus {
    type Error = UnknownUserStatus;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Active),
            2 => Ok(Self::Disabled),
            other => Err(UnknownUserStatus(other)),
        }
    }
}

impl From<UserStatus> for i16 {
    fn from(status: UserStatus) -> Self {
        match status {
            UserStatus::Active => 1,
            UserStatus::Disabled => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[sqlx(try_from = "i16")]
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const USER_COLUMNS: &str =
    "id, phone_number, first_name, last_name, status, created_at, updated_at";

/// Columns accepted by `sort_by`.
pub const SORTABLE_COLUMNS: [&str; 6] = [
    "created_at",
    "updated_at",
    "phone_number",
    "first_name",
    "last_name",
    "status",
];

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters for the admin user listing. Text filters match case-insensitive
/// substrings.
#[derive(Clone, Debug, Default)]
pub struct UserSearch {
    pub id: Option<Uuid>,
    pub phone_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: Option<UserStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl UserSearch {
    #[must_use]
    pub fn page_size(&self) -> i64 {
        self.limit
            .filter(|limit| *limit > 0)
            .map_or(DEFAULT_PAGE_SIZE, |limit| limit.min(MAX_PAGE_SIZE))
    }

    #[must_use]
    pub fn page_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Whitelisted sort column; unknown names fall back to `created_at`.
    #[must_use]
    pub fn sort_column(&self) -> &'static str {
        self.sort_by
            .as_deref()
            .and_then(|name| SORTABLE_COLUMNS.into_iter().find(|column| *column == name))
            .unwrap_or("created_at")
    }

    fn push_filters(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE TRUE");
        if let Some(id) = self.id {
            builder.push(" AND id = ").push_bind(id);
        }
        if let Some(phone) = &self.phone_number {
            builder
                .push(" AND phone_number ILIKE ")
                .push_bind(format!("%{phone}%"));
        }
        if let Some(first_name) = &self.first_name {
            builder
                .push(" AND first_name ILIKE ")
                .push_bind(format!("%{first_name}%"));
        }
        if let Some(last_name) = &self.last_name {
            builder
                .push(" AND last_name ILIKE ")
                .push_bind(format!("%{last_name}%"));
        }
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(i16::from(status));
        }
    }
}

/// Fetch the user for `phone_number`, creating it on first login.
///
/// # Errors
/// Returns an error if the query fails.
#[instrument(skip(conn))]
pub async fn get_or_create(conn: &mut PgConnection, phone_number: &str) -> sqlx::Result<User> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
    sqlx::query_as::<_, User>(&format!(
        r"
        INSERT INTO users (phone_number)
        VALUES ($1)
        ON CONFLICT (phone_number) DO UPDATE SET phone_number = EXCLUDED.phone_number
        RETURNING {USER_COLUMNS}
        "
    ))
    .bind(phone_number)
    .fetch_one(&mut *conn)
    .instrument(span)
    .await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn get_by_id(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<User>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .instrument(span)
        .await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn update_profile(
    conn: &mut PgConnection,
    id: Uuid,
    first_name: &str,
    last_name: &str,
) -> sqlx::Result<Option<User>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
    sqlx::query_as::<_, User>(&format!(
        r"
        UPDATE users
        SET first_name = $2, last_name = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "
    ))
    .bind(id)
    .bind(first_name)
    .bind(last_name)
    .fetch_optional(&mut *conn)
    .instrument(span)
    .await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: UserStatus,
) -> sqlx::Result<Option<User>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
    sqlx::query_as::<_, User>(&format!(
        r"
        UPDATE users
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "
    ))
    .bind(id)
    .bind(i16::from(status))
    .fetch_optional(&mut *conn)
    .instrument(span)
    .await
}

/// One page of users plus the total number of matches.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn search(conn: &mut PgConnection, search: &UserSearch) -> sqlx::Result<(Vec<User>, i64)> {
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
    search.push_filters(&mut count);
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .instrument(span)
        .await?;

    let mut page = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
    search.push_filters(&mut page);
    page.push(" ORDER BY ")
        .push(search.sort_column())
        .push(match search.sort_order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        })
        .push(", id")
        .push(" LIMIT ")
        .push_bind(search.page_size())
        .push(" OFFSET ")
        .push_bind(search.page_offset());

    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    let users = page
        .build_query_as::<User>()
        .fetch_all(&mut *conn)
        .instrument(span)
        .await?;

    Ok((users, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_smallint() {
        for status in [UserStatus::Active, UserStatus::Disabled] {
            assert_eq!(UserStatus::try_from(i16::from(status)).ok(), Some(status));
        }
        assert!(UserStatus::try_from(9).is_err());
    }

    #[test]
    fn page_size_defaults_and_caps() {
        let mut search = UserSearch::default();
        assert_eq!(search.page_size(), DEFAULT_PAGE_SIZE);
        search.limit = Some(500);
        assert_eq!(search.page_size(), MAX_PAGE_SIZE);
        search.limit = Some(0);
        assert_eq!(search.page_size(), DEFAULT_PAGE_SIZE);
        search.offset = Some(-4);
        assert_eq!(search.page_offset(), 0);
    }

    #[test]
    fn sort_column_is_whitelisted() {
        let mut search = UserSearch {
            sort_by: Some("phone_number".to_string()),
            ..UserSearch::default()
        };
        assert_eq!(search.sort_column(), "phone_number");
        search.sort_by = Some("id; DROP TABLE users".to_string());
        assert_eq!(search.sort_column(), "created_at");
    }

    #[test]
    fn filters_are_bound_not_interpolated() {
        let search = UserSearch {
            phone_number: Some("' OR 1=1 --".to_string()),
            status: Some(UserStatus::Disabled),
            ..UserSearch::default()
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        search.push_filters(&mut builder);
        let sql = builder.sql();
        assert!(sql.contains("phone_number ILIKE $1"));
        assert!(sql.contains("status = $2"));
        assert!(!sql.contains("OR 1=1"));
    }
}
