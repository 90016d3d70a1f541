//! Signed bearer tokens for users and admins.
//!
//! Tokens are HS256 JWTs carrying the subject id and an audience. The secret
//! and lifetime are read from [`Settings`] on every call, so a reload takes
//! effect for the next token issued or parsed.

use crate::settings::{self, Settings};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    User,
    Admin,
}

impl Audience {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,
    pub aud: Audience,
    pub iat: i64,
    pub exp: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    /// Missing, malformed, badly signed, expired or wrong-audience token.
    #[error("unauthorized")]
    Unauthorized,
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Clone, Debug)]
pub struct TokenService {
    settings: Arc<Settings>,
}

impl TokenService {
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Issue a token for `id`, valid for the configured lifetime.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn generate(&self, id: Uuid, aud: Audience) -> Result<String, TokenError> {
        self.generate_at(id, aud, Utc::now().timestamp())
    }

    pub(crate) fn generate_at(
        &self,
        id: Uuid,
        aud: Audience,
        now: i64,
    ) -> Result<String, TokenError> {
        let snapshot = self.settings.snapshot();
        let claims = Claims {
            id,
            aud,
            iat: now,
            exp: now + snapshot.access_token_ttl().num_seconds(),
        };
        let key = EncodingKey::from_secret(settings::secret_bytes(&snapshot.secret_key));
        encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(TokenError::Signing)
    }

    /// Verify signature, expiry and audience of a raw token.
    ///
    /// # Errors
    /// Returns [`TokenError::Unauthorized`] for every verification failure.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let secret = self.settings.secret_key();
        let key = DecodingKey::from_secret(settings::secret_bytes(&secret));

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(&[Audience::User.as_str(), Audience::Admin.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        decode::<Claims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                debug!("Rejected bearer token: {err}");
                TokenError::Unauthorized
            })
    }

    /// Extract the bearer token from `Authorization` and validate it.
    ///
    /// # Errors
    /// Returns [`TokenError::Unauthorized`] if the header is missing or the
    /// token does not verify.
    pub fn parse(&self, headers: &HeaderMap) -> Result<Claims, TokenError> {
        let token = extract_bearer_token(headers).ok_or(TokenError::Unauthorized)?;
        self.validate(token)
    }
}

/// Return the value after `Bearer ` in the `Authorization` header.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
