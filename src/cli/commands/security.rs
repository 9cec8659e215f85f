use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_PEPPER: &str = "pepper";
pub const ARG_MFA_ISSUER: &str = "mfa-issuer";
pub const ARG_AUTH_TIMEOUT: &str = "auth-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PEPPER)
                .long(ARG_PEPPER)
                .help("Server-side pepper mixed into code and credential hashing")
                .env("CUSTODIA_PEPPER")
                .required(true),
        )
        .arg(
            Arg::new(ARG_MFA_ISSUER)
                .long(ARG_MFA_ISSUER)
                .help("Issuer shown in authenticator apps for TOTP enrollment")
                .env("CUSTODIA_MFA_ISSUER")
                .default_value("custodia"),
        )
        .arg(
            Arg::new(ARG_AUTH_TIMEOUT)
                .long(ARG_AUTH_TIMEOUT)
                .help("Deadline for one authentication request; expiry denies the attempt")
                .env("CUSTODIA_AUTH_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..=60)),
        )
}

pub struct Options {
    pub pepper: String,
    pub issuer: String,
    pub auth_timeout_seconds: u64,
}

impl Options {
    /// Extract security options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let pepper = matches
            .get_one::<String>(ARG_PEPPER)
            .cloned()
            .context("missing required argument: --pepper")?;
        let issuer = matches
            .get_one::<String>(ARG_MFA_ISSUER)
            .cloned()
            .unwrap_or_else(|| "custodia".to_string());
        let auth_timeout_seconds = matches
            .get_one::<u64>(ARG_AUTH_TIMEOUT)
            .copied()
            .unwrap_or(5);
        Ok(Self {
            pepper,
            issuer,
            auth_timeout_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("custodia"))
    }

    #[test]
    fn parses_defaults() {
        temp_env::with_vars(
            [
                ("CUSTODIA_PEPPER", Some("test-pepper")),
                ("CUSTODIA_MFA_ISSUER", None::<&str>),
                ("CUSTODIA_AUTH_TIMEOUT_SECONDS", None::<&str>),
            ],
            || {
                let matches = command().get_matches_from(vec!["custodia"]);
                let options = Options::parse(&matches).expect("options");
                assert_eq!(options.pepper, "test-pepper");
                assert_eq!(options.issuer, "custodia");
                assert_eq!(options.auth_timeout_seconds, 5);
            },
        );
    }

    #[test]
    fn rejects_out_of_range_timeout() {
        temp_env::with_vars([("CUSTODIA_PEPPER", Some("test-pepper"))], || {
            let result = command().try_get_matches_from(vec![
                "custodia",
                "--auth-timeout-seconds",
                "600",
            ]);
            assert!(result.is_err());
        });
    }
}
