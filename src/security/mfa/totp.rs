//! TOTP helpers: RFC 6238, SHA-1, 6 digits, 30 second step.

use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Material returned exactly once at setup time.
#[derive(Debug)]
pub struct TotpSetupMaterial {
    pub secret_base32: String,
    /// `data:image/png;base64,...` QR for authenticator apps.
    pub qr_data_url: String,
}

/// Generate a fresh secret and the enrollment QR code.
pub(crate) fn generate_setup(issuer: &str, account: &str) -> Result<TotpSetupMaterial> {
    let secret = Secret::generate_secret();
    let secret_bytes = secret
        .to_bytes()
        .map_err(|e| anyhow!("secret generation error: {e}"))?;
    let totp = build_from_bytes(secret_bytes, issuer, account)?;
    let qr = totp
        .get_qr_base64()
        .map_err(|e| anyhow!("QR generation error: {e}"))?;
    Ok(TotpSetupMaterial {
        secret_base32: totp.get_secret_base32(),
        qr_data_url: format!("data:image/png;base64,{qr}"),
    })
}

/// Check a presented code against a stored base32 secret.
pub(crate) fn check_code(secret_base32: &str, issuer: &str, code: &str) -> Result<bool> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("stored TOTP secret is invalid: {e}"))?;
    let totp = build_from_bytes(secret_bytes, issuer, "user")?;
    Ok(totp.check_current(code).unwrap_or(false))
}

fn build_from_bytes(secret_bytes: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn setup_produces_base32_secret_and_qr() {
        let material = generate_setup("custodia", "user@example.com").unwrap();
        assert!(!material.secret_base32.is_empty());
        assert!(material.qr_data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn current_code_round_trips() {
        let material = generate_setup("custodia", "user@example.com").unwrap();
        let secret_bytes = Secret::Encoded(material.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = build_from_bytes(secret_bytes, "custodia", "user@example.com").unwrap();
        let code = totp.generate_current().unwrap();
        assert!(check_code(&material.secret_base32, "custodia", &code).unwrap());
    }

    #[test]
    fn wrong_code_is_rejected() {
        let material = generate_setup("custodia", "user@example.com").unwrap();
        assert!(!check_code(&material.secret_base32, "custodia", "000000").unwrap());
    }

    #[test]
    fn malformed_secret_is_an_error() {
        assert!(check_code("not-base32!!", "custodia", "123456").is_err());
    }
}
