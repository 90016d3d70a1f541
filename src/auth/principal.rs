//! Resolve the caller behind a bearer token.
//!
//! A valid signature is not enough: the subject must still exist, the token
//! must have been issued after the account was created (and, for admins, after
//! the last password reset), and users must not be disabled.

use super::AuthError;
use crate::{
    db::{
        admins::{self, Admin},
        users::{self, User, UserStatus},
    },
    token::{Audience, Claims, TokenService},
};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

/// Token `iat` (whole seconds) predates `instant`.
#[must_use]
pub fn issued_before(iat: i64, instant: DateTime<Utc>) -> bool {
    iat < instant.timestamp()
}

/// Token was issued before a password reset.
///
/// `iat` is truncated to the second, so any token from the second the reset
/// happened in is rejected unless the reset landed exactly on the boundary.
#[must_use]
pub fn issued_before_reset(iat: i64, reset_at: DateTime<Utc>) -> bool {
    let cutoff = if reset_at.timestamp_subsec_nanos() > 0 {
        reset_at.timestamp().saturating_add(1)
    } else {
        reset_at.timestamp()
    };
    iat < cutoff
}

fn claims_for(
    headers: &HeaderMap,
    tokens: &TokenService,
    audience: Audience,
) -> Result<Claims, AuthError> {
    let claims = tokens.parse(headers)?;
    if claims.aud != audience {
        debug!(expected = %audience, got = %claims.aud, "Token audience mismatch");
        return Err(AuthError::Unauthorized);
    }
    Ok(claims)
}

/// # Errors
/// [`AuthError::Unauthorized`] for a bad or stale token, and
/// [`AuthError::UserDisabled`] for a disabled account.
pub async fn require_user(
    headers: &HeaderMap,
    tokens: &TokenService,
    conn: &mut PgConnection,
) -> Result<User, AuthError> {
    let claims = claims_for(headers, tokens, Audience::User)?;
    let user = users::get_by_id(conn, claims.id)
        .await?
        .ok_or(AuthError::Unauthorized)?;
    if issued_before(claims.iat, user.created_at) {
        return Err(AuthError::Unauthorized);
    }
    if user.status == UserStatus::Disabled {
        return Err(AuthError::UserDisabled);
    }
    Ok(user)
}

/// # Errors
/// [`AuthError::Unauthorized`] for a bad token, an unknown admin, or a token
/// issued before the account was created or its password was reset.
pub async fn require_admin(
    headers: &HeaderMap,
    tokens: &TokenService,
    conn: &mut PgConnection,
) -> Result<Admin, AuthError> {
    let claims = claims_for(headers, tokens, Audience::Admin)?;
    let admin = admins::get_by_id(conn, claims.id)
        .await?
        .ok_or(AuthError::Unauthorized)?;
    if issued_before(claims.iat, admin.created_at)
        || admin
            .password_reset_at
            .is_some_and(|reset_at| issued_before_reset(claims.iat, reset_at))
    {
        return Err(AuthError::Unauthorized);
    }
    Ok(admin)
}

/// # Errors
/// [`AuthError::Forbidden`] unless the admin is super or sudo.
pub fn require_sudo(admin: &Admin) -> Result<(), AuthError> {
    if admin.role.can_sudo() {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
