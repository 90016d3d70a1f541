//! Route handlers.
//!
//! Handlers that touch the database take the request transaction as a
//! [`RequestTx`](crate::db::RequestTx) extension and return [`AuthError`]
//! responses on failure; the transaction middleware commits or rolls back
//! based on the status they produce.
//!
//! [`AuthError`]: crate::auth::AuthError

pub mod admin;
pub mod auth;
pub mod health;
pub mod root;
pub mod types;
pub mod user;
