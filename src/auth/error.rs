use crate::{
    db::{otp::OtpError, transaction::TransactionClosed},
    session::{SessionError, SessionState},
    token::TokenError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("a code was sent recently, wait before requesting another")]
    Throttled,
    #[error("too many codes requested, try again later")]
    RateExceeded,
    #[error("login session not found or expired")]
    SessionNotFound,
    #[error("invalid code")]
    InvalidCode,
    #[error("too many attempts, request a new code")]
    SessionCorrupted,
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("user is disabled")]
    UserDisabled,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Throttled | Self::RateExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::SessionNotFound
            | Self::InvalidCode
            | Self::SessionCorrupted
            | Self::Unauthorized
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::UserDisabled | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OtpError> for AuthError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::Throttled => Self::Throttled,
            OtpError::RateExceeded => Self::RateExceeded,
            OtpError::AlreadyUsed | OtpError::NotFound => {
                warn!("One-time code missing or consumed twice: {err}");
                Self::InvalidCode
            }
            OtpError::UnknownUser => Self::Internal(anyhow::anyhow!(err)),
            OtpError::Database(err) => Self::Internal(err.into()),
            OtpError::Internal(err) => Self::Internal(err),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => Self::SessionNotFound,
            SessionError::InvalidCode {
                state: SessionState::Corrupted,
            } => Self::SessionCorrupted,
            SessionError::InvalidCode { .. } => Self::InvalidCode,
            SessionError::Store(err) => Self::Internal(err),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unauthorized => Self::Unauthorized,
            TokenError::Signing(err) => Self::Internal(err.into()),
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<TransactionClosed> for AuthError {
    fn from(err: TransactionClosed) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(err) = &self {
            error!("Request failed: {err:#}");
            return (status, "Internal Server Error".to_string()).into_response();
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_maps_to_too_many_requests() {
        assert_eq!(
            AuthError::from(OtpError::Throttled).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::from(OtpError::RateExceeded).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn exhausted_session_is_distinguished_from_wrong_code() {
        let corrupted = AuthError::from(SessionError::InvalidCode {
            state: SessionState::Corrupted,
        });
        assert!(matches!(corrupted, AuthError::SessionCorrupted));
        assert_eq!(corrupted.status(), StatusCode::UNAUTHORIZED);

        let wrong = AuthError::from(SessionError::InvalidCode {
            state: SessionState::Waiting,
        });
        assert!(matches!(wrong, AuthError::InvalidCode));

        let resolved = AuthError::from(SessionError::InvalidCode {
            state: SessionState::Success,
        });
        assert!(matches!(resolved, AuthError::InvalidCode));
    }

    #[test]
    fn store_failures_are_internal() {
        let err = AuthError::from(SessionError::Store(anyhow::anyhow!("redis down")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let response = AuthError::Internal(anyhow::anyhow!("password=hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn disabled_user_is_forbidden() {
        assert_eq!(AuthError::UserDisabled.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
    }
}
