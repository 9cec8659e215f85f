//! Code generation and hashing shared by backup codes and email OTPs.
//!
//! Codes are never stored in plaintext: each one is Argon2id-hashed with a
//! server-side pepper before it touches the database.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{Rng, RngCore, rngs::OsRng};

pub(crate) const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
// No 0/O/1/I to keep hand-typed codes unambiguous.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub(crate) const OTP_CODE_LEN: usize = 6;

/// Generate one backup code in grouped display form (`ABCD-EFGH-JKLM`).
pub(crate) fn generate_backup_code() -> String {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    OsRng.fill_bytes(&mut raw);
    let normalized: String = raw
        .iter()
        .map(|byte| {
            let idx = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
            BACKUP_CODE_ALPHABET[idx] as char
        })
        .collect();
    format_backup_code(&normalized)
}

/// Generate a zero-padded numeric OTP.
pub(crate) fn generate_otp_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

/// Normalize a backup code for verification: strip separators, uppercase,
/// and reject anything outside the alphabet.
pub(crate) fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow::anyhow!("invalid backup code length"));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid backup code characters"));
    }
    Ok(normalized)
}

fn format_backup_code(normalized: &str) -> String {
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 2);
    for (idx, chunk) in normalized.as_bytes().chunks(BACKUP_CODE_GROUP_SIZE).enumerate() {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

/// Hash a code with Argon2id and the server-side pepper.
pub(crate) fn hash_code(code: &str, pepper: &[u8]) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = peppered_argon2(pepper)?;
    let hash = argon2
        .hash_password(code.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash code"))?
        .to_string();
    Ok(hash)
}

/// Verify a code against a stored hash.
pub(crate) fn verify_code(code: &str, stored_hash: &str, pepper: &[u8]) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow::anyhow!("invalid stored code hash"))?;
    let argon2 = peppered_argon2(pepper)?;
    Ok(argon2.verify_password(code.as_bytes(), &parsed).is_ok())
}

fn peppered_argon2(pepper: &[u8]) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id"))
    .context("argon2 setup")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backup_codes_are_grouped_and_normalizable() {
        let code = generate_backup_code();
        assert_eq!(code.len(), BACKUP_CODE_LEN + 2);
        let normalized = normalize_backup_code(&code).unwrap();
        assert_eq!(normalized.len(), BACKUP_CODE_LEN);
    }

    #[test]
    fn normalize_rejects_wrong_length_and_alphabet() {
        assert!(normalize_backup_code("short").is_err());
        assert!(normalize_backup_code("ABCD-EFGH-JKL0").is_err()); // zero not in alphabet
    }

    #[test]
    fn otp_codes_are_six_digits() {
        for _ in 0..20 {
            let code = generate_otp_code();
            assert_eq!(code.len(), OTP_CODE_LEN);
            assert!(code.chars().all(|ch| ch.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let pepper = b"pepper";
        let hash = hash_code("123456", pepper).unwrap();
        assert!(verify_code("123456", &hash, pepper).unwrap());
        assert!(!verify_code("654321", &hash, pepper).unwrap());
    }

    #[test]
    fn pepper_mismatch_fails_verification() {
        let hash = hash_code("123456", b"pepper-a").unwrap();
        assert!(!verify_code("123456", &hash, b"pepper-b").unwrap());
    }
}
