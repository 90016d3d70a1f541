use crate::db::otp::OtpPolicy;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_OTP_COOLDOWN_SECONDS: &str = "otp-cooldown-seconds";
pub const ARG_OTP_WINDOW_SECONDS: &str = "otp-window-seconds";
pub const ARG_OTP_WINDOW_MAX: &str = "otp-window-max";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_COOLDOWN_SECONDS)
                .long(ARG_OTP_COOLDOWN_SECONDS)
                .help("Refuse a new code while an unused one is younger than this")
                .env("OTPGATE_OTP_COOLDOWN_SECONDS")
                .default_value("120")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_WINDOW_SECONDS)
                .long(ARG_OTP_WINDOW_SECONDS)
                .help("Length of the window capped by --otp-window-max")
                .env("OTPGATE_OTP_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_WINDOW_MAX)
                .long(ARG_OTP_WINDOW_MAX)
                .help("Codes a user may request per window")
                .env("OTPGATE_OTP_WINDOW_MAX")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub policy: OtpPolicy,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let seconds = |name: &str| {
            matches
                .get_one::<u64>(name)
                .copied()
                .map(Duration::from_secs)
                .with_context(|| format!("missing required argument: --{name}"))
        };
        let window_max = matches
            .get_one::<u32>(ARG_OTP_WINDOW_MAX)
            .copied()
            .context("missing required argument: --otp-window-max")?;

        Ok(Self {
            policy: OtpPolicy::new()
                .with_cooldown(seconds(ARG_OTP_COOLDOWN_SECONDS)?)
                .with_window(seconds(ARG_OTP_WINDOW_SECONDS)?, window_max),
        })
    }
}
