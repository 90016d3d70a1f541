use anyhow::{anyhow, Result};
use clap::{ArgMatches, Command};

pub const CMD_SETTINGS: &str = "settings";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.subcommand(
        Command::new(CMD_SETTINGS)
            .about("Manage stored settings")
            .subcommand_required(true)
            .subcommand(
                Command::new("init")
                    .about("Apply the schema and store a generated signing key if none exists"),
            ),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Options {
    Init,
}

impl Options {
    /// # Errors
    /// Returns an error for an unknown subcommand.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        match matches.subcommand_name() {
            Some("init") => Ok(Self::Init),
            Some(other) => Err(anyhow!("unknown settings command: {other}")),
            None => Err(anyhow!("missing settings command")),
        }
    }
}
