//! Map parsed arguments to an [`Action`].
//!
//! Without a subcommand the API server runs; `admin` and `settings` run a
//! maintenance task against the database and exit.

use crate::cli::{
    actions::{admin, server, settings, Action},
    commands::{self, otp, redis},
    globals::GlobalArgs,
};
use anyhow::{Context, Result};
use secrecy::SecretString;

fn globals(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis = redis::Options::parse(matches)?;
    Ok(GlobalArgs::new(SecretString::from(dsn), redis.url))
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = globals(matches)?;

    match matches.subcommand() {
        Some((commands::admin::CMD_ADMIN, sub)) => Ok(Action::Admin(admin::Args {
            globals,
            command: commands::admin::Options::parse(sub)?,
        })),
        Some((commands::settings::CMD_SETTINGS, sub)) => {
            Ok(Action::Settings(settings::Args {
                globals,
                command: commands::settings::Options::parse(sub)?,
            }))
        }
        _ => {
            let server = commands::server::Options::parse(matches)?;
            let otp = otp::Options::parse(matches)?;
            Ok(Action::Server(server::Args {
                globals,
                port: server.port,
                request_timeout: server.request_timeout,
                trust_forwarded_headers: server.trust_forwarded_headers,
                otp_policy: otp.policy,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::settings::Options as SettingsOptions;
    use secrecy::ExposeSecret;

    #[test]
    fn dsn_required() {
        temp_env::with_vars([("OTPGATE_DSN", None::<&str>)], || {
            let matches = commands::new().get_matches_from(vec!["otpgate"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("missing required argument: --dsn"));
            }
        });
    }

    #[test]
    fn no_subcommand_runs_server() {
        temp_env::with_vars(
            [
                ("OTPGATE_DSN", Some("postgres://localhost/otpgate")),
                ("OTPGATE_PORT", Some("9000")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["otpgate"]);
                match handler(&matches) {
                    Ok(Action::Server(args)) => {
                        assert_eq!(args.port, 9000);
                        assert_eq!(
                            args.globals.dsn.expose_secret(),
                            "postgres://localhost/otpgate"
                        );
                    }
                    other => panic!("unexpected action: {other:?}"),
                }
            },
        );
    }

    #[test]
    fn settings_subcommand_dispatches() {
        temp_env::with_vars([("OTPGATE_DSN", Some("postgres://localhost/otpgate"))], || {
            let matches = commands::new().get_matches_from(vec!["otpgate", "settings", "init"]);
            match handler(&matches) {
                Ok(Action::Settings(args)) => assert_eq!(args.command, SettingsOptions::Init),
                other => panic!("unexpected action: {other:?}"),
            }
        });
    }
}
