//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::security;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let security_opts = security::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        pepper: security_opts.pepper,
        issuer: security_opts.issuer,
        auth_timeout_seconds: security_opts.auth_timeout_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_required() {
        temp_env::with_vars(
            [
                ("CUSTODIA_DSN", None::<&str>),
                ("CUSTODIA_PEPPER", Some("test-pepper")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["custodia", "--dsn", ""]);
                // clap enforces presence; an empty value still parses, the
                // handler only fails when the argument is absent entirely.
                assert!(handler(&matches).is_ok());
            },
        );
    }

    #[test]
    fn builds_server_action() {
        temp_env::with_vars([("CUSTODIA_PEPPER", Some("test-pepper"))], || {
            let command = crate::cli::commands::new();
            let matches = command.get_matches_from(vec![
                "custodia",
                "--dsn",
                "postgres://user@localhost:5432/custodia",
                "--port",
                "9090",
            ]);
            let action = handler(&matches).expect("action");
            let Action::Server(args) = action;
            assert_eq!(args.port, 9090);
            assert_eq!(args.pepper, "test-pepper");
            assert_eq!(args.auth_timeout_seconds, 5);
        });
    }
}
