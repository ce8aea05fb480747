use axum::extract::rejection::JsonRejection;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use murmur_types::api::{
    ApiMessage, Claims, MessageListResponse, MessageResponse, SendMessageRequest,
};

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_CONTENT_CHARS: usize = 300;

/// Anonymous intake: no authentication, and nothing about the sender is
/// recorded. The append is a single INSERT, so concurrent senders to the
/// same recipient all land.
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::Validation("message content must not be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::Validation(format!(
            "message content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }

    let message_id = Uuid::new_v4();
    let db_state = state.clone();
    let target = req.username.clone();

    // Run blocking DB work off the async runtime
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let user = db_state
            .db
            .find_by_username(&target)?
            .ok_or(ApiError::NotFound("user not found"))?;

        if !user.is_accepting_messages {
            return Err(ApiError::NotAccepting);
        }

        db_state
            .db
            .insert_message(&message_id.to_string(), &user.id, &content)?;
        Ok(())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!(e))
    })??;

    Ok(Json(ApiMessage::ok("message sent")))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let user_id = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db_state.db.messages_for(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!(e))
        })??;

    let messages = rows
        .into_iter()
        .map(|row| MessageResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt message id '{}': {}", row.id, e);
                Uuid::default()
            }),
            created_at: parse_store_timestamp(&row.created_at, &row.id),
            content: row.content,
        })
        .collect();

    Ok(Json(MessageListResponse {
        success: true,
        messages,
    }))
}

/// Removing an id that is already gone (or never existed) still succeeds.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let user_id = claims.sub.to_string();
    let mid = message_id.to_string();

    let removed = tokio::task::spawn_blocking(move || db_state.db.delete_message(&user_id, &mid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!(e))
        })??;

    let note = if removed == 0 {
        "message was already gone"
    } else {
        "message deleted"
    };
    Ok(Json(ApiMessage::ok(note)))
}

fn parse_store_timestamp(raw: &str, message_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message '{}': {}", raw, message_id, e);
            DateTime::default()
        })
}
