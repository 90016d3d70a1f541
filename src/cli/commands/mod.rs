pub mod admin;
pub mod logging;
pub mod otp;
pub mod redis;
pub mod server;
pub mod settings;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_DSN: &str = "dsn";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("otpgate")
        .about("One-time password authentication service")
        .long_about(
            "Runs the API server by default. Use the admin and settings subcommands for maintenance.",
        )
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("OTPGATE_DSN")
                .hide_env_values(true)
                .global(true),
        );

    let command = redis::with_args(command);
    let command = server::with_args(command);
    let command = otp::with_args(command);
    let command = admin::with_args(command);
    let command = settings::with_args(command);
    logging::with_args(command)
}
