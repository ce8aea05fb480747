use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use murmur_types::api::{UserListResponse, UserSummary};

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

/// Public directory of registrants. Order is insertion order in practice,
/// not a contract.
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let offset = u64::from(page - 1) * u64::from(limit);

    let db_state = state.clone();
    let (rows, total) = tokio::task::spawn_blocking(move || {
        let rows = db_state.db.list_users(offset, u64::from(limit))?;
        let total = db_state.db.count_users()?;
        Ok::<_, anyhow::Error>((rows, total))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!(e))
    })??;

    let users = rows
        .into_iter()
        .map(|row| UserSummary {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user id '{}': {}", row.id, e);
                Uuid::default()
            }),
            username: row.username,
            email: row.email,
            is_accepting_messages: row.is_accepting_messages,
        })
        .collect();

    Ok(Json(UserListResponse {
        users,
        total,
        page,
        total_pages: total.div_ceil(u64::from(limit)),
    }))
}
