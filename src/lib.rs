//! # Otpgate (one-time password authentication)
//!
//! `otpgate` authenticates end-users with one-time codes delivered out of band
//! and issues signed bearer tokens for the rest of the API. Administrators log
//! in with a username and password instead.
//!
//! ## Login flow
//!
//! 1. `POST /api/v1/auth/request-otp` resolves (or creates) the user for a phone
//!    number, issues a six character code subject to throttling, and opens a
//!    login session in Redis. The caller receives an opaque session token,
//!    never the code itself.
//! 2. `POST /api/v1/auth/verify-otp` submits the code against the session
//!    token. Every attempt is counted atomically before the code is compared,
//!    so a session accepts at most three guesses and is corrupted on the
//!    fourth. A correct code resolves the session exactly once and returns an
//!    access token.
//!
//! ## Request lifecycle
//!
//! Every database-touching route runs inside one transaction that is committed
//! on a 2xx response and rolled back otherwise, panics included. Route groups
//! are rate limited per client with a Redis fixed window counter.

pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod rate_limit;
pub mod session;
pub mod settings;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}
