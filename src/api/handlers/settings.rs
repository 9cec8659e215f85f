//! Security-settings endpoints: effective settings for a user and updates
//! to the per-user override or the global default.

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{SecurityState, error_response};
use crate::security::settings::SecuritySettings;

#[derive(Deserialize, ToSchema)]
pub struct SettingsQuery {
    /// Absent means "the global default".
    pub user_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/v1/security/settings",
    params(("user_id" = Option<Uuid>, Query, description = "User whose effective settings to resolve")),
    responses(
        (status = 200, description = "Effective settings.", body = SecuritySettings),
    ),
    tag = "settings"
)]
/// Effective settings: the per-user override when one exists, the global
/// default otherwise.
pub async fn get(
    state: Extension<Arc<SecurityState>>,
    Query(query): Query<SettingsQuery>,
) -> impl IntoResponse {
    match state.settings.resolve(query.user_id).await {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateSettingsRequest {
    /// Absent updates the global default row.
    pub user_id: Option<Uuid>,
    #[serde(flatten)]
    pub settings: SecuritySettings,
}

#[utoipa::path(
    put,
    path = "/v1/security/settings",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 204, description = "Settings updated."),
        (status = 400, description = "Out-of-range field."),
    ),
    tag = "settings"
)]
pub async fn update(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> impl IntoResponse {
    let result = match payload.user_id {
        Some(user_id) => {
            state
                .settings
                .update_user_override(user_id, &payload.settings)
                .await
        }
        None => state.settings.update_global_default(&payload.settings).await,
    };
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}
