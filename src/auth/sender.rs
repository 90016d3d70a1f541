//! Out-of-band delivery of one-time codes.
//!
//! The default sender for local dev is `LogCodeSender`, which logs and returns
//! `Ok(())`. SMS gateways plug in behind the same trait.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

#[async_trait]
pub trait CodeSender: Send + Sync {
    /// Deliver `code` to `phone_number`. An error fails the request.
    async fn send(&self, phone_number: &str, code: &str) -> Result<()>;
}

/// Local dev sender that logs instead of delivering.
#[derive(Clone, Debug)]
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send(&self, phone_number: &str, code: &str) -> Result<()> {
        info!(phone = %mask_phone(phone_number), "code delivery stub");
        debug!(phone = %mask_phone(phone_number), %code, "code delivery stub payload");
        Ok(())
    }
}

/// Keep only the last four digits of a phone number for logs.
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let visible: String = phone.chars().skip(count - 4).collect();
    format!("****{visible}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_phone_keeps_last_four() {
        assert_eq!(mask_phone("+14155550123"), "****0123");
        assert_eq!(mask_phone("123"), "****");
    }

    #[tokio::test]
    async fn log_sender_accepts_every_message() {
        assert!(LogCodeSender.send("+14155550123", "ABC123").await.is_ok());
    }
}
