use crate::api;
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub pepper: String,
    pub issuer: String,
    pub auth_timeout_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = api::ApiConfig::new(SecretString::from(args.pepper), args.issuer)
        .with_auth_timeout(Duration::from_secs(args.auth_timeout_seconds));

    api::new(args.port, args.dsn, config).await
}
