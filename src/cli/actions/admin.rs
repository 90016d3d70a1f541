use crate::{
    auth::password,
    cli::{commands::admin::Options, globals::GlobalArgs},
    db::{self, admins},
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub command: Options,
}

/// The given password, or a generated one that is printed once.
fn password_or_generate(password: Option<SecretString>) -> (SecretString, bool) {
    match password {
        Some(password) => (password, false),
        None => (SecretString::from(password::generate_password()), true),
    }
}

/// Execute an admin maintenance command.
/// # Errors
/// Returns an error if the database is unreachable, the username is taken or
/// unknown, or hashing fails.
pub async fn execute(args: Args) -> Result<()> {
    let pool = db::connect(args.globals.dsn.expose_secret()).await?;
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;

    match args.command {
        Options::Create {
            username,
            role,
            password,
        } => {
            let (password, generated) = password_or_generate(password);
            let hash = password::hash_password(password.expose_secret())?;
            let admin = admins::create(&mut conn, &username, role, &hash)
                .await
                .map_err(|err| {
                    if db::is_unique_violation(&err) {
                        anyhow!("admin {username} already exists")
                    } else {
                        anyhow!(err).context("Failed to create admin")
                    }
                })?;
            info!(admin_id = %admin.id, role = %admin.role, "Admin created");
            println!("created admin {} ({}) id={}", admin.username, admin.role, admin.id);
            if generated {
                println!("password: {}", password.expose_secret());
            }
        }
        Options::List => {
            for admin in admins::list(&mut conn).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    admin.id,
                    admin.username,
                    admin.role,
                    admin.created_at.to_rfc3339()
                );
            }
        }
        Options::Delete { username } => {
            if !admins::delete(&mut conn, &username).await? {
                return Err(anyhow!("admin {username} not found"));
            }
            info!(%username, "Admin deleted");
            println!("deleted admin {username}");
        }
        Options::ResetPassword { username, password } => {
            let (password, generated) = password_or_generate(password);
            let hash = password::hash_password(password.expose_secret())?;
            if !admins::reset_password(&mut conn, &username, &hash).await? {
                return Err(anyhow!("admin {username} not found"));
            }
            info!(%username, "Admin password reset");
            println!("password reset for {username}; existing tokens are revoked");
            if generated {
                println!("password: {}", password.expose_secret());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_password_is_kept() {
        let (password, generated) =
            password_or_generate(Some(SecretString::from("s3cret-pass".to_string())));
        assert_eq!(password.expose_secret(), "s3cret-pass");
        assert!(!generated);

        let (password, generated) = password_or_generate(None);
        assert!(!password.expose_secret().is_empty());
        assert!(generated);
    }
}
