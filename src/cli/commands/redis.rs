use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_REDIS_URL: &str = "redis-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_REDIS_URL)
            .long(ARG_REDIS_URL)
            .help("Redis connection URL for login sessions and rate limits")
            .env("OTPGATE_REDIS_URL")
            .default_value("redis://127.0.0.1:6379")
            .hide_env_values(true)
            .global(true),
    )
}

#[derive(Debug)]
pub struct Options {
    pub url: SecretString,
}

impl Options {
    /// # Errors
    /// Returns an error if the URL is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_REDIS_URL)
            .cloned()
            .context("missing required argument: --redis-url")?;
        Ok(Self {
            url: SecretString::from(url),
        })
    }
}
