//! Lockout status and administrative release endpoints.

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

#[derive(Deserialize, ToSchema)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct LockoutStatusResponse {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/security/lockout",
    params(("user_id" = Uuid, Query, description = "User to inspect")),
    responses(
        (status = 200, description = "Current lockout state.", body = LockoutStatusResponse),
    ),
    tag = "lockout"
)]
pub async fn status(
    state: Extension<Arc<SecurityState>>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    match state.lockout.check_user_locked(query.user_id).await {
        Ok(status) => (
            StatusCode::OK,
            Json(LockoutStatusResponse {
                locked: status.locked,
                level: status.level,
                retry_after_seconds: status.retry_after_seconds,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ReleaseRequest {
    pub user_id: Uuid,
    pub released_by: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct ReleaseResponse {
    pub released: bool,
}

#[utoipa::path(
    post,
    path = "/v1/security/lockout/release",
    request_body = ReleaseRequest,
    responses(
        (status = 200, description = "Release attempted; `released` is false when nothing was active.", body = ReleaseResponse),
    ),
    tag = "lockout"
)]
/// Administrative release of an active lockout.
pub async fn release(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<ReleaseRequest>,
) -> impl IntoResponse {
    match state
        .lockout
        .manual_release(payload.user_id, payload.released_by)
        .await
    {
        Ok(released) => (StatusCode::OK, Json(ReleaseResponse { released })).into_response(),
        Err(err) => error_response(&err),
    }
}
