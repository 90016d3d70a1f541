use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

pub const ARG_PORT: &str = "port";
pub const ARG_REQUEST_TIMEOUT_SECONDS: &str = "request-timeout-seconds";
pub const ARG_TRUST_FORWARDED_HEADERS: &str = "trust-forwarded-headers";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("OTPGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT_SECONDS)
                .long(ARG_REQUEST_TIMEOUT_SECONDS)
                .help("Abort requests that take longer than this many seconds")
                .default_value("30")
                .env("OTPGATE_REQUEST_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_HEADERS)
                .long(ARG_TRUST_FORWARDED_HEADERS)
                .help("Rate limit by X-Forwarded-For/X-Real-IP (only behind a trusted proxy)")
                .env("OTPGATE_TRUST_FORWARDED_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug)]
pub struct Options {
    pub port: u16,
    pub request_timeout: Duration,
    pub trust_forwarded_headers: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let port = matches
            .get_one::<u16>(ARG_PORT)
            .copied()
            .context("missing required argument: --port")?;
        let request_timeout = matches
            .get_one::<u64>(ARG_REQUEST_TIMEOUT_SECONDS)
            .copied()
            .map(Duration::from_secs)
            .context("missing required argument: --request-timeout-seconds")?;
        Ok(Self {
            port,
            request_timeout,
            trust_forwarded_headers: matches.get_flag(ARG_TRUST_FORWARDED_HEADERS),
        })
    }
}
