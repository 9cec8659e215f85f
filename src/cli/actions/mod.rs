pub mod server;

mod run;

/// What the CLI resolved to run.
#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// Run the action to completion.
    ///
    /// # Errors
    /// Propagates whatever the underlying action returns.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
