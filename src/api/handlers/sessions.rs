//! Session listing and termination endpoints.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{SecurityState, error_response};
use crate::security::session::SessionRecord;

#[derive(Deserialize, ToSchema)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/v1/sessions",
    params(("user_id" = Uuid, Query, description = "Session owner")),
    responses(
        (status = 200, description = "Active sessions, most recently active first.", body = [SessionRecord]),
    ),
    tag = "sessions"
)]
pub async fn list(
    state: Extension<Arc<SecurityState>>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    match state.sessions.list_sessions(query.user_id).await {
        Ok(sessions) => (StatusCode::OK, Json(sessions)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}",
    params(
        ("session_id" = Uuid, Path, description = "Session to terminate"),
        ("user_id" = Uuid, Query, description = "Requesting user"),
    ),
    responses(
        (status = 204, description = "Session terminated."),
        (status = 403, description = "Not the session owner."),
    ),
    tag = "sessions"
)]
/// Terminate one session. Acting on another user's session (or a session
/// that does not exist) is a permission denial, never a 404.
pub async fn terminate(
    Path(session_id): Path<Uuid>,
    state: Extension<Arc<SecurityState>>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    match state.sessions.terminate(session_id, query.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize, ToSchema)]
pub struct RevokeOthersRequest {
    pub user_id: Uuid,
    pub current_session_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct RevokeOthersResponse {
    pub terminated: u64,
}

#[utoipa::path(
    post,
    path = "/v1/sessions/revoke-others",
    request_body = RevokeOthersRequest,
    responses(
        (status = 200, description = "Other sessions terminated.", body = RevokeOthersResponse),
    ),
    tag = "sessions"
)]
pub async fn revoke_others(
    state: Extension<Arc<SecurityState>>,
    Json(payload): Json<RevokeOthersRequest>,
) -> impl IntoResponse {
    match state
        .sessions
        .terminate_all_others(payload.user_id, payload.current_session_id)
        .await
    {
        Ok(terminated) => (StatusCode::OK, Json(RevokeOthersResponse { terminated })).into_response(),
        Err(err) => error_response(&err),
    }
}
