//! Administrator accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use std::{fmt, str::FromStr};
use tracing::{info_span, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Super,
    Sudo,
    Visitor,
}

impl AdminRole {
    /// Super and sudo admins may change user state; visitors only read.
    #[must_use]
    pub fn can_sudo(self) -> bool {
        self <= Self::Sudo
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Super => "super",
            Self::Sudo => "sudo",
            Self::Visitor => "visitor",
        }
    }
}

impl fmt::Display for AdminRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "super" => Ok(Self::Super),
            "sudo" => Ok(Self::Sudo),
            "visitor" => Ok(Self::Visitor),
            other => Err(format!("unknown admin role: {other}")),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown admin role {0}")]
pub struct UnknownAdminRole(i16);

impl TryFrom<i16> for AdminRole {
    type Error = UnknownAdminRole;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Super),
            2 => Ok(Self::Sudo),
            3 => Ok(Self::Visitor),
            other => Err(UnknownAdminRole(other)),
        }
    }
}

impl From<AdminRole> for i16 {
    fn from(role: AdminRole) -> Self {
        match role {
            AdminRole::Super => 1,
            AdminRole::Sudo => 2,
            AdminRole::Visitor => 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct Admin {
    pub id: Uuid,
    pub username: String,
    #[sqlx(try_from = "i16")]
    pub role: AdminRole,
    #[serde(skip)]
    pub hashed_password: String,
    pub password_reset_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ADMIN_COLUMNS: &str =
    "id, username, role, hashed_password, password_reset_at, created_at, updated_at";

/// # Errors
/// Returns an error if the insert fails; a taken username surfaces as a
/// unique violation.
pub async fn create(
    conn: &mut PgConnection,
    username: &str,
    role: AdminRole,
    hashed_password: &str,
) -> sqlx::Result<Admin> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
    sqlx::query_as::<_, Admin>(&format!(
        r"
        INSERT INTO admins (username, role, hashed_password)
        VALUES ($1, $2, $3)
        RETURNING {ADMIN_COLUMNS}
        "
    ))
    .bind(username)
    .bind(i16::from(role))
    .bind(hashed_password)
    .fetch_one(&mut *conn)
    .instrument(span)
    .await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn get_by_username(conn: &mut PgConnection, username: &str) -> sqlx::Result<Option<Admin>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    sqlx::query_as::<_, Admin>(&format!(
        "SELECT {ADMIN_COLUMNS} FROM admins WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(&mut *conn)
    .instrument(span)
    .await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn get_by_id(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<Admin>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    sqlx::query_as::<_, Admin>(&format!("SELECT {ADMIN_COLUMNS} FROM admins WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .instrument(span)
        .await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn list(conn: &mut PgConnection) -> sqlx::Result<Vec<Admin>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    sqlx::query_as::<_, Admin>(&format!(
        "SELECT {ADMIN_COLUMNS} FROM admins ORDER BY created_at, username"
    ))
    .fetch_all(&mut *conn)
    .instrument(span)
    .await
}

/// Returns `true` when a row was deleted.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn delete(conn: &mut PgConnection, username: &str) -> sqlx::Result<bool> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "DELETE");
    let result = sqlx::query("DELETE FROM admins WHERE username = $1")
        .bind(username)
        .execute(&mut *conn)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace the password hash and stamp `password_reset_at`, which invalidates
/// every token issued before now.
///
/// Returns `true` when the admin exists.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn reset_password(
    conn: &mut PgConnection,
    username: &str,
    hashed_password: &str,
) -> sqlx::Result<bool> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
    let result = sqlx::query(
        r"
        UPDATE admins
        SET hashed_password = $2, password_reset_at = NOW(), updated_at = NOW()
        WHERE username = $1
        ",
    )
    .bind(username)
    .bind(hashed_password)
    .execute(&mut *conn)
    .instrument(span)
    .await?;
    Ok(result.rows_affected() > 0)
}
