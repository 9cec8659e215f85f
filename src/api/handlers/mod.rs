//! HTTP handlers. Each maps transport concerns to the security engines and
//! turns [`SecurityError`] into a status code without leaking internals.

pub(crate) mod auth;
pub(crate) mod health;
pub(crate) mod lockout;
pub(crate) mod mfa;
pub(crate) mod sessions;
pub(crate) mod settings;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use tracing::error;
use utoipa::ToSchema;

use crate::security::{
    error::SecurityError, lockout::LockoutEngine, mfa::MfaEngine,
    orchestrator::SecurityOrchestrator, session::SessionManager, settings::SettingsResolver,
};

/// Everything the handlers need, behind one `Extension`.
pub struct SecurityState {
    pub orchestrator: SecurityOrchestrator,
    pub lockout: LockoutEngine,
    pub mfa: MfaEngine,
    pub sessions: SessionManager,
    pub settings: SettingsResolver,
    pub auth_timeout: Duration,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

/// Map a [`SecurityError`] to a response. Persistence details never reach
/// the wire; they go to the operational logs only.
pub(crate) fn error_response(err: &SecurityError) -> Response {
    match err {
        SecurityError::Validation(message) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: message.clone(),
                retry_after_seconds: None,
            }),
        )
            .into_response(),
        SecurityError::PolicyDenied {
            reason,
            retry_after_seconds,
        } => (
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                error: reason.as_str().to_string(),
                retry_after_seconds: *retry_after_seconds,
            }),
        )
            .into_response(),
        SecurityError::Authorization => (
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                error: "not permitted".to_string(),
                retry_after_seconds: None,
            }),
        )
            .into_response(),
        SecurityError::Persistence(source) => {
            error!("request failed: {source:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "temporary failure, try again".to_string(),
                    retry_after_seconds: None,
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::error::DenyReason;

    #[test]
    fn validation_maps_to_bad_request() {
        let response = error_response(&SecurityError::Validation("nope".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn policy_denied_maps_to_forbidden() {
        let response = error_response(&SecurityError::denied(DenyReason::LockedOut));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn persistence_maps_to_internal_error() {
        let response =
            error_response(&SecurityError::Persistence(anyhow::anyhow!("pool gone")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
