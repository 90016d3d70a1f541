use crate::{
    api::{self, ServerConfig},
    cli::globals::GlobalArgs,
    db::otp::OtpPolicy,
};
use anyhow::Result;
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub port: u16,
    pub request_timeout: Duration,
    pub trust_forwarded_headers: bool,
    pub otp_policy: OtpPolicy,
}

/// Execute the server action.
/// # Errors
/// Returns an error if Postgres or Redis are unreachable, settings are missing,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        request_timeout = ?args.request_timeout,
        trust_forwarded_headers = args.trust_forwarded_headers,
        otp_cooldown = ?args.otp_policy.cooldown(),
        otp_window = ?args.otp_policy.window(),
        otp_window_max = args.otp_policy.window_max(),
        "Starting server"
    );

    api::new(ServerConfig {
        port: args.port,
        dsn: args.globals.dsn,
        redis_url: args.globals.redis_url,
        request_timeout: args.request_timeout,
        trust_forwarded_headers: args.trust_forwarded_headers,
        otp_policy: args.otp_policy,
    })
    .await
}
