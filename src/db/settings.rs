//! The single `settings` row.

use crate::settings::SettingsValues;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use tracing::{info_span, Instrument};

/// # Errors
/// Returns an error if the query fails.
pub async fn fetch(pool: &PgPool) -> Result<Option<SettingsValues>> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    let row: Option<(String, i32)> = sqlx::query_as(
        "SELECT secret_key, access_token_expire_minutes FROM settings WHERE id = 1",
    )
    .fetch_optional(pool)
    .instrument(span)
    .await
    .context("Failed to read settings")?;

    Ok(row.map(|(secret_key, minutes)| SettingsValues {
        secret_key: SecretString::from(secret_key),
        access_token_expire_minutes: i64::from(minutes),
    }))
}

/// # Errors
/// Returns an error if the lifetime does not fit the column or the write fails.
pub async fn store(pool: &PgPool, values: &SettingsValues) -> Result<()> {
    let minutes = i32::try_from(values.access_token_expire_minutes)
        .context("access token lifetime out of range")?;
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPSERT");
    sqlx::query(
        r"
        INSERT INTO settings (id, secret_key, access_token_expire_minutes)
        VALUES (1, $1, $2)
        ON CONFLICT (id) DO UPDATE
        SET secret_key = EXCLUDED.secret_key,
            access_token_expire_minutes = EXCLUDED.access_token_expire_minutes
        ",
    )
    .bind(values.secret_key.expose_secret())
    .bind(minutes)
    .execute(pool)
    .instrument(span)
    .await
    .context("Failed to store settings")?;
    Ok(())
}

/// Returns `true` when the row was created.
///
/// # Errors
/// Returns an error if the insert fails.
pub async fn insert_if_missing(pool: &PgPool, values: &SettingsValues) -> Result<bool> {
    let minutes = i32::try_from(values.access_token_expire_minutes)
        .context("access token lifetime out of range")?;
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
    let result = sqlx::query(
        r"
        INSERT INTO settings (id, secret_key, access_token_expire_minutes)
        VALUES (1, $1, $2)
        ON CONFLICT (id) DO NOTHING
        ",
    )
    .bind(values.secret_key.expose_secret())
    .bind(minutes)
    .execute(pool)
    .instrument(span)
    .await
    .context("Failed to initialize settings")?;
    Ok(result.rows_affected() > 0)
}
