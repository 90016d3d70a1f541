use crate::cli::actions::{admin, server, settings, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::Admin(args) => admin::execute(args).await,
        Action::Settings(args) => settings::execute(args).await,
    }
}
