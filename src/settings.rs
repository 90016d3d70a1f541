//! Process-wide signing secret and token lifetime.
//!
//! Values live in the single-row `settings` table and are cached behind a
//! reader/writer lock. Readers (every token issued or parsed) never block each
//! other; `reload` and `update` swap the cached values under the write lock.

use crate::db;
use anyhow::{Context, Result};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

pub const DEFAULT_ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 1440;
const SECRET_KEY_BYTES: usize = 256;

#[derive(Clone)]
pub struct SettingsValues {
    pub secret_key: SecretString,
    pub access_token_expire_minutes: i64,
}

impl SettingsValues {
    /// Fresh values with a random secret and the default token lifetime.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            secret_key: generate_secret_key()?,
            access_token_expire_minutes: DEFAULT_ACCESS_TOKEN_EXPIRE_MINUTES,
        })
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.access_token_expire_minutes)
    }
}

impl fmt::Debug for SettingsValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsValues")
            .field("secret_key", &"***")
            .field(
                "access_token_expire_minutes",
                &self.access_token_expire_minutes,
            )
            .finish()
    }
}

#[derive(Debug)]
pub struct Settings {
    current: RwLock<SettingsValues>,
}

impl Settings {
    #[must_use]
    pub fn new(values: SettingsValues) -> Self {
        Self {
            current: RwLock::new(values),
        }
    }

    /// Read the persisted settings row.
    ///
    /// # Errors
    /// Returns an error if the query fails or the row has not been initialized
    /// (run `otpgate settings init`).
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let values = db::settings::fetch(pool)
            .await?
            .context("settings row is missing, run `otpgate settings init` first")?;
        Ok(Self::new(values))
    }

    /// Re-read the persisted row and swap it in.
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is missing; the cached
    /// values are left untouched in that case.
    pub async fn reload(&self, pool: &PgPool) -> Result<()> {
        let values = db::settings::fetch(pool)
            .await?
            .context("settings row is missing")?;
        self.replace(values);
        Ok(())
    }

    /// Persist new values and swap them in.
    ///
    /// # Errors
    /// Returns an error if the update fails; the cache is only replaced after
    /// the write succeeds.
    pub async fn update(&self, pool: &PgPool, values: SettingsValues) -> Result<()> {
        db::settings::store(pool, &values).await?;
        self.replace(values);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> SettingsValues {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn secret_key(&self) -> SecretString {
        self.snapshot().secret_key
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> chrono::Duration {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token_ttl()
    }

    pub(crate) fn replace(&self, values: SettingsValues) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = values;
    }
}

/// Generate a signing secret: 256 random bytes, base64 encoded.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_secret_key() -> Result<SecretString> {
    let mut bytes = vec![0u8; SECRET_KEY_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate secret key")?;
    Ok(SecretString::from(Base64::encode_string(&bytes)))
}

/// Insert the settings row with a fresh secret unless one exists.
///
/// Returns `true` when a row was written.
///
/// # Errors
/// Returns an error if secret generation or the insert fails.
pub async fn init_defaults(pool: &PgPool) -> Result<bool> {
    let values = SettingsValues::generate()?;
    db::settings::insert_if_missing(pool, &values).await
}

/// Reload settings whenever the process receives `SIGHUP`.
///
/// # Errors
/// Returns an error if the signal handler cannot be installed.
#[cfg(unix)]
pub fn spawn_reload_on_sighup(settings: std::sync::Arc<Settings>, pool: PgPool) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match settings.reload(&pool).await {
                Ok(()) => tracing::info!("Settings reloaded"),
                Err(err) => tracing::error!("Failed to reload settings: {err:#}"),
            }
        }
    });
    Ok(())
}

pub(crate) fn secret_bytes(secret: &SecretString) -> &[u8] {
    secret.expose_secret().as_bytes()
}
