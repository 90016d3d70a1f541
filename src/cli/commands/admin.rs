use crate::db::admins::AdminRole;
use anyhow::{anyhow, Context, Result};
use clap::{builder::ValueParser, Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const CMD_ADMIN: &str = "admin";
pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_ROLE: &str = "role";

fn username_arg() -> Arg {
    Arg::new(ARG_USERNAME)
        .short('u')
        .long(ARG_USERNAME)
        .help("Admin username")
        .required(true)
}

fn password_arg() -> Arg {
    Arg::new(ARG_PASSWORD)
        .long(ARG_PASSWORD)
        .help("Admin password; a random one is generated and printed when omitted")
        .env("OTPGATE_ADMIN_PASSWORD")
        .hide_env_values(true)
}

#[must_use]
pub fn validator_role() -> ValueParser {
    ValueParser::from(|role: &str| role.parse::<AdminRole>())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.subcommand(
        Command::new(CMD_ADMIN)
            .about("Manage administrator accounts")
            .subcommand_required(true)
            .subcommand(
                Command::new("create")
                    .about("Create an administrator")
                    .arg(username_arg())
                    .arg(
                        Arg::new(ARG_ROLE)
                            .long(ARG_ROLE)
                            .help("super, sudo or visitor")
                            .default_value("sudo")
                            .value_parser(validator_role()),
                    )
                    .arg(password_arg()),
            )
            .subcommand(Command::new("list").about("List administrators"))
            .subcommand(
                Command::new("delete")
                    .about("Delete an administrator")
                    .arg(username_arg()),
            )
            .subcommand(
                Command::new("reset-password")
                    .about("Replace a password and revoke existing tokens")
                    .arg(username_arg())
                    .arg(password_arg()),
            ),
    )
}

#[derive(Debug)]
pub enum Options {
    Create {
        username: String,
        role: AdminRole,
        password: Option<SecretString>,
    },
    List,
    Delete {
        username: String,
    },
    ResetPassword {
        username: String,
        password: Option<SecretString>,
    },
}

impl Options {
    /// Parse the `admin` subcommand matches.
    ///
    /// # Errors
    /// Returns an error for an unknown subcommand or a missing username.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let username = |sub: &ArgMatches| {
            sub.get_one::<String>(ARG_USERNAME)
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .context("missing required argument: --username")
        };
        let password = |sub: &ArgMatches| {
            sub.get_one::<String>(ARG_PASSWORD)
                .cloned()
                .map(SecretString::from)
        };

        match matches.subcommand() {
            Some(("create", sub)) => Ok(Self::Create {
                username: username(sub)?,
                role: sub
                    .get_one::<AdminRole>(ARG_ROLE)
                    .copied()
                    .unwrap_or(AdminRole::Sudo),
                password: password(sub),
            }),
            Some(("list", _)) => Ok(Self::List),
            Some(("delete", sub)) => Ok(Self::Delete {
                username: username(sub)?,
            }),
            Some(("reset-password", sub)) => Ok(Self::ResetPassword {
                username: username(sub)?,
                password: password(sub),
            }),
            Some((other, _)) => Err(anyhow!("unknown admin command: {other}")),
            None => Err(anyhow!("missing admin command")),
        }
    }
}
