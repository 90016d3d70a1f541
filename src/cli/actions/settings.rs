use crate::{
    cli::{commands::settings::Options, globals::GlobalArgs},
    db, settings,
};
use anyhow::Result;
use secrecy::ExposeSecret;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub command: Options,
}

/// Execute a settings maintenance command.
/// # Errors
/// Returns an error if the database is unreachable or a statement fails.
pub async fn execute(args: Args) -> Result<()> {
    let pool = db::connect(args.globals.dsn.expose_secret()).await?;

    match args.command {
        Options::Init => {
            db::apply_schema(&pool).await?;
            if settings::init_defaults(&pool).await? {
                info!("Settings initialized");
                println!("settings initialized with a new signing key");
            } else {
                println!("settings already present, left unchanged");
            }
        }
    }

    Ok(())
}
