use super::{password, sender::mask_phone, AuthError, CodeSender};
use crate::{
    db::{
        admins::{self, Admin},
        otp::{self, OtpPolicy, CODE_LENGTH},
        users::{self, User, UserStatus},
    },
    session::{fingerprint, SessionStore, SessionToken},
    token::TokenService,
};
use regex::Regex;
use sqlx::PgConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// E.164: a plus sign, no leading zero, 7 to 15 digits.
#[must_use]
pub fn valid_phone_number(phone: &str) -> bool {
    Regex::new(r"^\+[1-9]\d{6,14}$").is_ok_and(|regex| regex.is_match(phone))
}

#[must_use]
pub fn valid_code(code: &str) -> bool {
    code.chars().count() == CODE_LENGTH
}

/// Ties the OTP repository, session store and code delivery together.
///
/// Database work runs on the caller's connection, which is the request
/// transaction; the session store is not part of that transaction.
#[derive(Clone)]
pub struct AuthService {
    sessions: Arc<dyn SessionStore>,
    sender: Arc<dyn CodeSender>,
    tokens: TokenService,
    policy: OtpPolicy,
}

impl AuthService {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        sender: Arc<dyn CodeSender>,
        tokens: TokenService,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            sessions,
            sender,
            tokens,
            policy,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Resolve or create the user, issue a code, deliver it, and open a login
    /// session. Returns the session token for the client.
    ///
    /// # Errors
    /// [`AuthError::Validation`] for a malformed number, throttling errors from
    /// the OTP repository, [`AuthError::UserDisabled`], and internal errors
    /// for store or delivery failures.
    #[instrument(skip(self, conn, phone_number), fields(phone = %mask_phone(phone_number)))]
    pub async fn request_otp(
        &self,
        conn: &mut PgConnection,
        phone_number: &str,
    ) -> Result<SessionToken, AuthError> {
        if !valid_phone_number(phone_number) {
            return Err(AuthError::Validation(
                "phone_number must be in E.164 format".to_string(),
            ));
        }

        let user = users::get_or_create(conn, phone_number).await?;
        if user.status == UserStatus::Disabled {
            return Err(AuthError::UserDisabled);
        }

        let otp = otp::create(conn, user.id, &self.policy).await?;
        self.sender.send(phone_number, &otp.code).await?;
        let token = self.sessions.create(otp.id, &otp.code).await?;

        info!(user_id = %user.id, session = %fingerprint(token.as_str()), "Login code sent");
        Ok(token)
    }

    /// Check `code` against the session, consume the OTP, and return its
    /// owner.
    ///
    /// # Errors
    /// [`AuthError::SessionNotFound`], [`AuthError::InvalidCode`] or
    /// [`AuthError::SessionCorrupted`] from the session store, and
    /// [`AuthError::UserDisabled`].
    #[instrument(skip_all, fields(session = %fingerprint(session_token)))]
    pub async fn verify_otp(
        &self,
        conn: &mut PgConnection,
        session_token: &str,
        code: &str,
    ) -> Result<User, AuthError> {
        if !valid_code(code) {
            return Err(AuthError::Validation(format!(
                "code must be exactly {CODE_LENGTH} characters"
            )));
        }

        let otp_id = self.sessions.check_code(session_token, code).await?;
        otp::waste(conn, otp_id).await?;
        let user = otp::get_user_by_otp_id(conn, otp_id).await?;
        if user.status == UserStatus::Disabled {
            return Err(AuthError::UserDisabled);
        }

        info!(user_id = %user.id, "Login code verified");
        Ok(user)
    }

    /// Password login for administrators.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] for an unknown username or a wrong
    /// password.
    #[instrument(skip(self, conn, password))]
    pub async fn admin_login(
        &self,
        conn: &mut PgConnection,
        username: &str,
        password: &str,
    ) -> Result<Admin, AuthError> {
        let Some(admin) = admins::get_by_username(conn, username).await? else {
            password::verify_dummy(password);
            warn!("Admin login for unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &admin.hashed_password) {
            warn!(admin_id = %admin.id, "Admin login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(admin_id = %admin.id, "Admin logged in");
        Ok(admin)
    }
}
