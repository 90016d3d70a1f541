//! Postgres access: pool setup, the per-request transaction, and the
//! repositories the auth flows read and write.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info_span, Instrument};

pub mod admins;
pub mod otp;
pub mod settings;
pub mod transaction;
pub mod users;

pub use self::transaction::{transactional, RequestTx};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Open the connection pool.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

/// Create missing tables and indexes.
///
/// # Errors
/// Returns an error if any statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "DDL");
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to apply schema")?;
    Ok(())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Seconds as a Postgres interval literal, bound as `$n::interval`.
pub(crate) fn interval(duration: Duration) -> String {
    format!("{} seconds", duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_formats_seconds() {
        assert_eq!(interval(Duration::from_secs(120)), "120 seconds");
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["users", "user_otps", "admins", "settings"] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
