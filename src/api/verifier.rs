//! Postgres-backed credential verifier.
//!
//! The security core treats credential storage as an external collaborator;
//! this is the default implementation the server wires in, reading Argon2id
//! hashes from a `user_credentials` table.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::security::external::CredentialVerifier;

pub struct PgCredentialVerifier {
    pool: PgPool,
    pepper: SecretString,
}

impl PgCredentialVerifier {
    #[must_use]
    pub fn new(pool: PgPool, pepper: SecretString) -> Self {
        Self { pool, pepper }
    }

    async fn lookup(&self, identifier: &str) -> Result<Option<(Uuid, String)>> {
        let query = r"
            SELECT user_id, credential_hash
            FROM user_credentials
            WHERE identifier = $1
              AND deleted_at IS NULL
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identifier.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load credential")?;
        Ok(row.map(|row| (row.get("user_id"), row.get("credential_hash"))))
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn resolve(&self, identifier: &str) -> Result<Option<Uuid>> {
        Ok(self.lookup(identifier).await?.map(|(user_id, _)| user_id))
    }

    async fn verify(&self, identifier: &str, credential: &str) -> Result<Option<Uuid>> {
        let Some((user_id, stored_hash)) = self.lookup(identifier).await? else {
            return Ok(None);
        };
        let parsed = PasswordHash::new(&stored_hash)
            .map_err(|_| anyhow::anyhow!("stored credential hash is malformed"))?;
        let argon2 = Argon2::new_with_secret(
            self.pepper.expose_secret().as_bytes(),
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::default(),
        )
        .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id"))?;
        if argon2
            .verify_password(credential.as_bytes(), &parsed)
            .is_ok()
        {
            Ok(Some(user_id))
        } else {
            Ok(None)
        }
    }
}
