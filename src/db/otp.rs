//! One-time codes issued to users.
//!
//! Codes are never deleted; `used_at` marks consumption. Issuance is throttled
//! per user with a cooldown on unused codes and a cap per rolling window. Both
//! checks run after the user row is locked, so concurrent requests for the same
//! user serialize inside their transactions.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sqlx::PgConnection;
use std::time::Duration;
use tracing::{info, info_span, instrument, Instrument};
use uuid::Uuid;

use super::{interval, users::User};

pub const CODE_LENGTH: usize = 6;
const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
// Largest multiple of 36 that fits in a byte; higher bytes are resampled.
const CODE_SAMPLE_LIMIT: u8 = 252;

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Issuance thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    cooldown: Duration,
    window: Duration,
    window_max: u32,
}

impl OtpPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cooldown: Duration::from_secs(120),
            window: Duration::from_secs(600),
            window_max: 3,
        }
    }

    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub const fn with_window(mut self, window: Duration, window_max: u32) -> Self {
        self.window = window;
        self.window_max = window_max;
        self
    }

    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub const fn window_max(&self) -> u32 {
        self.window_max
    }
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OtpError {
    #[error("a code was sent recently, wait before requesting another")]
    Throttled,
    #[error("too many codes requested, try again later")]
    RateExceeded,
    #[error("user not found")]
    UnknownUser,
    #[error("code not found")]
    NotFound,
    #[error("code already used")]
    AlreadyUsed,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Six characters drawn uniformly from `[A-Z0-9]` using the OS random source.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_code() -> anyhow::Result<String> {
    let mut code = String::with_capacity(CODE_LENGTH);
    let mut buffer = [0u8; 16];
    while code.len() < CODE_LENGTH {
        OsRng
            .try_fill_bytes(&mut buffer)
            .context("failed to generate one-time code")?;
        for byte in buffer {
            if byte < CODE_SAMPLE_LIMIT && code.len() < CODE_LENGTH {
                code.push(char::from(CODE_ALPHABET[usize::from(byte % 36)]));
            }
        }
    }
    Ok(code)
}

/// Issue a new code for `user_id`, subject to `policy`.
///
/// # Errors
/// [`OtpError::Throttled`] when an unused code is younger than the cooldown,
/// [`OtpError::RateExceeded`] when the window cap is reached, and
/// [`OtpError::UnknownUser`] when the user row does not exist. Nothing is
/// inserted in those cases.
#[instrument(skip(conn, policy))]
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    policy: &OtpPolicy,
) -> Result<OtpChallenge, OtpError> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .instrument(span)
        .await?
        .ok_or(OtpError::UnknownUser)?;

    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    let cooling_down: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS (
            SELECT 1 FROM user_otps
            WHERE user_id = $1
              AND used_at IS NULL
              AND created_at > NOW() - $2::interval
        )
        ",
    )
    .bind(user_id)
    .bind(interval(policy.cooldown))
    .fetch_one(&mut *conn)
    .instrument(span)
    .await?;
    if cooling_down {
        return Err(OtpError::Throttled);
    }

    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    let issued: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*) FROM user_otps
        WHERE user_id = $1
          AND created_at > NOW() - $2::interval
        ",
    )
    .bind(user_id)
    .bind(interval(policy.window))
    .fetch_one(&mut *conn)
    .instrument(span)
    .await?;
    if issued >= i64::from(policy.window_max) {
        return Err(OtpError::RateExceeded);
    }

    let code = generate_code()?;
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
    let otp = sqlx::query_as::<_, OtpChallenge>(
        r"
        INSERT INTO user_otps (user_id, code)
        VALUES ($1, $2)
        RETURNING id, user_id, code, created_at, used_at
        ",
    )
    .bind(user_id)
    .bind(&code)
    .fetch_one(&mut *conn)
    .instrument(span)
    .await?;

    info!(otp_id = %otp.id, "Issued one-time code");
    Ok(otp)
}

/// # Errors
/// Returns an error if the query fails.
pub async fn get_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<OtpChallenge>, OtpError> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    let otp = sqlx::query_as::<_, OtpChallenge>(
        "SELECT id, user_id, code, created_at, used_at FROM user_otps WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .instrument(span)
    .await?;
    Ok(otp)
}

/// Owner of a code.
///
/// # Errors
/// Returns [`OtpError::NotFound`] if no code has that id.
pub async fn get_user_by_otp_id(conn: &mut PgConnection, otp_id: Uuid) -> Result<User, OtpError> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
    sqlx::query_as::<_, User>(
        r"
        SELECT u.id, u.phone_number, u.first_name, u.last_name, u.status, u.created_at, u.updated_at
        FROM users u
        JOIN user_otps o ON o.user_id = u.id
        WHERE o.id = $1
        ",
    )
    .bind(otp_id)
    .fetch_optional(&mut *conn)
    .instrument(span)
    .await?
    .ok_or(OtpError::NotFound)
}

/// Mark a code as consumed.
///
/// # Errors
/// Returns [`OtpError::AlreadyUsed`] if the code was consumed before (or does
/// not exist); the row is left untouched.
pub async fn waste(conn: &mut PgConnection, otp_id: Uuid) -> Result<(), OtpError> {
    let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
    let result = sqlx::query("UPDATE user_otps SET used_at = NOW() WHERE id = $1 AND used_at IS NULL")
        .bind(otp_id)
        .execute(&mut *conn)
        .instrument(span)
        .await?;
    if result.rows_affected() == 0 {
        return Err(OtpError::AlreadyUsed);
    }
    Ok(())
}
