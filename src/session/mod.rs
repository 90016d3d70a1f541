//! Login sessions: the short-lived challenge/response state machine.
//!
//! A session is created when a code is issued and is keyed by a random opaque
//! token handed to the client. States move `Waiting -> Success` or
//! `Waiting -> Corrupted` and never leave a terminal state. Every verification
//! attempt bumps `tries` through an atomic store operation *before* the code is
//! compared, so parallel guesses against one token are serialized and capped.

use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

#[cfg(test)]
mod memory;
mod redis;

pub use self::redis::{connect as connect_redis, RedisSessionStore};

/// Expiry of a session, refreshed on every write.
pub const SESSION_TTL: Duration = Duration::from_secs(180);

/// Attempts allowed before the session is corrupted.
pub const MAX_TRIES: u32 = 3;

pub(crate) const KEY_PREFIX: &str = "otp_session:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SessionState {
    Waiting,
    Success,
    Corrupted,
}

impl From<SessionState> for u8 {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Waiting => 0,
            SessionState::Success => 1,
            SessionState::Corrupted => 2,
        }
    }
}

impl TryFrom<u8> for SessionState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Success),
            2 => Ok(Self::Corrupted),
            other => Err(format!("unknown session state {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub tries: u32,
    pub otp_id: Uuid,
    pub code: String,
    pub state: SessionState,
}

impl LoginSession {
    #[must_use]
    pub fn new(otp_id: Uuid, code: &str) -> Self {
        Self {
            tries: 0,
            otp_id,
            code: code.to_string(),
            state: SessionState::Waiting,
        }
    }

    /// Count one attempt; a waiting session past the budget is corrupted.
    pub(crate) fn record_attempt(&mut self) {
        self.tries = self.tries.saturating_add(1);
        if self.tries > MAX_TRIES && self.state == SessionState::Waiting {
            self.state = SessionState::Corrupted;
        }
    }

    /// `Waiting -> Success`. Returns `false` for any other starting state.
    pub(crate) fn resolve(&mut self) -> bool {
        if self.state == SessionState::Waiting {
            self.state = SessionState::Success;
            true
        } else {
            false
        }
    }

    fn code_matches(&self, submitted: &str) -> bool {
        self.code.as_bytes().ct_eq(submitted.as_bytes()).into()
    }
}

/// Outcome of an atomic `Waiting -> Success` attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    AlreadyFinal(SessionState),
    Missing,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// Expired or never created.
    #[error("session not found")]
    NotFound,
    /// Wrong code, or the session is already `Success`/`Corrupted`.
    #[error("invalid code")]
    InvalidCode { state: SessionState },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Opaque session handle returned to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// 256 bits from the OS random source, base64url without padding.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> anyhow::Result<Self> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate session token")?;
        Ok(Self(Base64UrlUnpadded::encode_string(&bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", fingerprint(&self.0))
    }
}

/// Short prefix of a token, safe to log.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}

pub(crate) fn storage_key(token: &str) -> String {
    format!("{KEY_PREFIX}{token}")
}

/// Backend for login sessions.
///
/// Implementations provide three primitives; `attempt` and `resolve` must each
/// be a single indivisible read-modify-write. The login semantics
/// (`create`, `increment_tries`, `check_code`) are built on top of them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write `session` under `token` with a fresh [`SESSION_TTL`].
    async fn put(&self, token: &str, session: &LoginSession) -> Result<(), SessionError>;

    /// Atomically apply [`LoginSession::record_attempt`] and refresh the expiry.
    /// `None` when the session does not exist.
    async fn attempt(&self, token: &str) -> Result<Option<LoginSession>, SessionError>;

    /// Atomically apply [`LoginSession::resolve`] and refresh the expiry.
    async fn resolve(&self, token: &str) -> Result<Resolution, SessionError>;

    /// Open a waiting session for an issued code.
    async fn create(&self, otp_id: Uuid, code: &str) -> Result<SessionToken, SessionError> {
        let token = SessionToken::generate()?;
        self.put(token.as_str(), &LoginSession::new(otp_id, code))
            .await?;
        debug!(session = %fingerprint(token.as_str()), %otp_id, "Login session created");
        Ok(token)
    }

    /// Count one attempt. A resolved session still records the attempt but
    /// reports [`SessionError::InvalidCode`].
    async fn increment_tries(&self, token: &str) -> Result<LoginSession, SessionError> {
        let session = self.attempt(token).await?.ok_or(SessionError::NotFound)?;
        if session.state == SessionState::Waiting {
            Ok(session)
        } else {
            Err(SessionError::InvalidCode {
                state: session.state,
            })
        }
    }

    /// Verify `code` against the session and return the OTP id on success.
    ///
    /// The attempt is counted before comparing. At most one caller ever gets
    /// `Ok` for a given session.
    async fn check_code(&self, token: &str, code: &str) -> Result<Uuid, SessionError> {
        let session = self.increment_tries(token).await?;
        if !session.code_matches(code) {
            debug!(session = %fingerprint(token), tries = session.tries, "Code mismatch");
            return Err(SessionError::InvalidCode {
                state: session.state,
            });
        }

        match self.resolve(token).await? {
            Resolution::Resolved => Ok(session.otp_id),
            Resolution::AlreadyFinal(state) => Err(SessionError::InvalidCode { state }),
            Resolution::Missing => Err(SessionError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_waiting_with_no_tries() {
        let session = LoginSession::new(Uuid::nil(), "ABC123");
        assert_eq!(session.tries, 0);
        assert_eq!(session.state, SessionState::Waiting);
    }

    #[test]
    fn fourth_attempt_corrupts_waiting_session() {
        let mut session = LoginSession::new(Uuid::nil(), "ABC123");
        for _ in 0..MAX_TRIES {
            session.record_attempt();
            assert_eq!(session.state, SessionState::Waiting);
        }
        session.record_attempt();
        assert_eq!(session.tries, 4);
        assert_eq!(session.state, SessionState::Corrupted);
    }

    #[test]
    fn attempts_never_leave_success() {
        let mut session = LoginSession::new(Uuid::nil(), "ABC123");
        assert!(session.resolve());
        for _ in 0..10 {
            session.record_attempt();
        }
        assert_eq!(session.state, SessionState::Success);
        assert_eq!(session.tries, 10);
    }

    #[test]
    fn resolve_only_from_waiting() {
        let mut session = LoginSession::new(Uuid::nil(), "ABC123");
        session.state = SessionState::Corrupted;
        assert!(!session.resolve());
        assert_eq!(session.state, SessionState::Corrupted);

        session.state = SessionState::Success;
        assert!(!session.resolve());
    }

    #[test]
    fn code_comparison_is_exact() {
        let session = LoginSession::new(Uuid::nil(), "ABC123");
        assert!(session.code_matches("ABC123"));
        assert!(!session.code_matches("abc123"));
        assert!(!session.code_matches("ABC12"));
        assert!(!session.code_matches("ABC1234"));
    }

    #[test]
    fn session_serializes_state_as_integer() {
        let mut session = LoginSession::new(Uuid::nil(), "ABC123");
        session.state = SessionState::Corrupted;
        let json = serde_json::to_value(&session).expect("json");
        assert_eq!(json["state"], 2);
        assert_eq!(json["tries"], 0);
        assert_eq!(json["code"], "ABC123");

        let parsed: LoginSession = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed, session);
    }

    #[test]
    fn unknown_state_is_rejected() {
        let raw = r#"{"tries":0,"otp_id":"00000000-0000-0000-0000-000000000000","code":"X","state":7}"#;
        assert!(serde_json::from_str::<LoginSession>(raw).is_err());
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = SessionToken::generate().expect("token");
        let b = SessionToken::generate().expect("token");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn debug_output_hides_token() {
        let token = SessionToken::generate().expect("token");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains(token.as_str()));
    }
}
