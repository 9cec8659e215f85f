//! Narrow interfaces to external collaborators.
//!
//! Credential hashing/verification and notification delivery live outside
//! this core; the orchestrator only decides *that* something happens and
//! with what payload.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Verifies a presented credential for an identifier.
///
/// The hashing primitive is opaque to this core; implementations typically
/// wrap a password store.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Resolve an identifier to a user id without checking any credential.
    /// Lockout checks run before credential verification and need the id.
    async fn resolve(&self, identifier: &str) -> Result<Option<Uuid>>;

    /// Returns `Ok(Some(user_id))` when the identifier resolves to a user and
    /// the credential matches, `Ok(None)` on a bad credential or unknown
    /// identifier.
    async fn verify(&self, identifier: &str, credential: &str) -> Result<Option<Uuid>>;
}

/// Hands a notification payload to the delivery layer.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, user_id: Uuid, template_id: &str, payload: Value) -> Result<()>;
}

/// Dispatcher that only logs; used when no delivery layer is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogNotificationDispatcher {
    async fn send(&self, user_id: Uuid, template_id: &str, payload: Value) -> Result<()> {
        info!(%user_id, template_id, %payload, "notification dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_dispatcher_accepts_payloads() {
        let dispatcher = LogNotificationDispatcher;
        let result = dispatcher
            .send(
                Uuid::nil(),
                "security_alert",
                serde_json::json!({"kind": "lockout"}),
            )
            .await;
        assert!(result.is_ok());
    }
}
