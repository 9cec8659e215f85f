use crate::cli::actions::{Action, server};
use anyhow::Result;

/// Single dispatch point; new `Action` variants get an arm here.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
