//! Login and MFA-completion endpoints.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{SecurityState, error_response};
use crate::security::{
    mfa::MfaFactor,
    orchestrator::{AuthOutcome, AuthRequest},
    session::DeviceInfo,
};

#[derive(Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginResponse {
    Allowed {
        session_id: Uuid,
        user_id: Uuid,
        /// Bearer token, shown exactly once.
        token: String,
        expires_at: DateTime<Utc>,
    },
    MfaRequired {
        challenge_id: Uuid,
    },
    Denied {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_seconds: Option<i64>,
    },
}

fn outcome_response(outcome: AuthOutcome) -> (StatusCode, Json<LoginResponse>) {
    match outcome {
        AuthOutcome::Allowed { session } => (
            StatusCode::OK,
            Json(LoginResponse::Allowed {
                session_id: session.session.id,
                user_id: session.session.user_id,
                token: session.token,
                expires_at: session.session.expires_at,
            }),
        ),
        AuthOutcome::RequiresMfa { challenge_id } => (
            StatusCode::OK,
            Json(LoginResponse::MfaRequired { challenge_id }),
        ),
        AuthOutcome::Denied {
            reason,
            retry_after_seconds,
        } => (
            StatusCode::UNAUTHORIZED,
            Json(LoginResponse::Denied {
                reason: reason.as_str().to_string(),
                retry_after_seconds,
            }),
        ),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Authenticated or second factor required.", body = LoginResponse),
        (status = 400, description = "Malformed request."),
        (status = 401, description = "Denied.", body = LoginResponse),
    ),
    tag = "auth"
)]
/// Authenticate an identifier/credential pair. A denial is a normal
/// outcome, not an error; only malformed input and storage failures map to
/// error statuses.
pub async fn login(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<AuthRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .authenticate_with_timeout(&payload, state.auth_timeout)
        .await
    {
        Ok(outcome) => outcome_response(outcome).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct MfaVerifyRequest {
    pub user_id: Uuid,
    pub factor: MfaFactor,
    pub code: String,
    pub identifier: String,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Factor accepted, session issued.", body = LoginResponse),
        (status = 400, description = "Malformed request."),
        (status = 401, description = "Factor rejected or challenge expired.", body = LoginResponse),
    ),
    tag = "auth"
)]
/// Complete a login that answered `mfa_required`, presenting one factor.
pub async fn verify_mfa(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<MfaVerifyRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .verify_mfa(
            payload.user_id,
            payload.factor,
            &payload.code,
            &payload.identifier,
            &payload.device,
        )
        .await
    {
        Ok(outcome) => outcome_response(outcome).into_response(),
        Err(err) => error_response(&err),
    }
}
