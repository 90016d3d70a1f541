//! Login orchestration and caller authentication.

mod error;
pub mod password;
pub mod principal;
pub mod sender;
mod service;

pub use self::error::AuthError;
pub use self::sender::{CodeSender, LogCodeSender};
pub use self::service::{valid_code, valid_phone_number, AuthService};
