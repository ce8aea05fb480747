use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json, extract::State, response::IntoResponse};

use murmur_types::api::{AcceptMessagesRequest, AcceptMessagesResponse, Claims};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn get_accepting(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .find_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user not found"))?;

    Ok(Json(AcceptMessagesResponse {
        success: true,
        is_accepting_messages: user.is_accepting_messages,
    }))
}

/// Idempotent: writing the flag it already holds is fine.
pub async fn set_accepting(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<AcceptMessagesRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    state
        .db
        .set_accepting(&claims.sub.to_string(), req.accept_messages)?;

    let note = if req.accept_messages {
        "you are now accepting messages"
    } else {
        "you are no longer accepting messages"
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "message": note,
        "isAcceptingMessages": req.accept_messages,
    })))
}
