//! MFA enrollment and maintenance endpoints.

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{SecurityState, error_response};
use crate::security::mfa::{MfaStatus, OtpPurpose};

#[derive(Deserialize, ToSchema)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/v1/mfa/status",
    params(("user_id" = Uuid, Query, description = "User to inspect")),
    responses(
        (status = 200, description = "MFA posture.", body = MfaStatus),
    ),
    tag = "mfa"
)]
pub async fn status(
    state: Extension<Arc<SecurityState>>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    match state.mfa.status(query.user_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct TotpSetupRequest {
    pub user_id: Uuid,
    /// Label shown in the authenticator app, usually the account email.
    pub account_label: String,
}

#[derive(Serialize, ToSchema)]
pub struct TotpSetupResponse {
    /// Base32 secret, shown exactly once.
    pub secret: String,
    pub qr_data_url: String,
}

#[utoipa::path(
    post,
    path = "/v1/mfa/totp/setup",
    request_body = TotpSetupRequest,
    responses(
        (status = 200, description = "Enrollment started.", body = TotpSetupResponse),
        (status = 400, description = "TOTP already active."),
    ),
    tag = "mfa"
)]
/// Begin TOTP enrollment. The secret is never retrievable again.
pub async fn setup_totp(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<TotpSetupRequest>,
) -> impl IntoResponse {
    match state
        .mfa
        .setup_totp(payload.user_id, &payload.account_label)
        .await
    {
        Ok(material) => (
            StatusCode::OK,
            Json(TotpSetupResponse {
                secret: material.secret_base32,
                qr_data_url: material.qr_data_url,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct TotpConfirmRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/v1/mfa/totp/confirm",
    request_body = TotpConfirmRequest,
    responses(
        (status = 200, description = "TOTP activated."),
        (status = 400, description = "No enrollment pending."),
        (status = 401, description = "Wrong code; still pending."),
    ),
    tag = "mfa"
)]
pub async fn confirm_totp(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<TotpConfirmRequest>,
) -> impl IntoResponse {
    match state.mfa.confirm_totp(payload.user_id, &payload.code).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/mfa/totp",
    request_body = UserQuery,
    responses(
        (status = 204, description = "TOTP disabled and secret dropped."),
    ),
    tag = "mfa"
)]
pub async fn disable_totp(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<UserQuery>,
) -> impl IntoResponse {
    match state.mfa.disable_totp(payload.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SendOtpRequest {
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
}

#[utoipa::path(
    post,
    path = "/v1/mfa/email-otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 202, description = "OTP generated and handed to delivery."),
    ),
    tag = "mfa"
)]
/// Issue a fresh email OTP; any prior unconsumed code for the same purpose
/// stops working.
pub async fn send_email_otp(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<SendOtpRequest>,
) -> impl IntoResponse {
    match state
        .mfa
        .send_email_otp(payload.user_id, payload.purpose)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Serialize, ToSchema)]
pub struct BackupCodesResponse {
    /// Plaintext codes, shown exactly once.
    pub codes: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/v1/mfa/backup-codes",
    request_body = UserQuery,
    responses(
        (status = 200, description = "Fresh batch generated; prior unused codes invalidated.", body = BackupCodesResponse),
    ),
    tag = "mfa"
)]
pub async fn regenerate_backup_codes(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<UserQuery>,
) -> impl IntoResponse {
    match state.mfa.generate_backup_codes(payload.user_id).await {
        Ok(codes) => (StatusCode::OK, Json(BackupCodesResponse { codes })).into_response(),
        Err(err) => error_response(&err),
    }
}
