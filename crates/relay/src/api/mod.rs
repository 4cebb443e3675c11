// REST surface: presence snapshot and conversation history.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use murmur_common::types::HistoryPage;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ErrorCode, RelayError},
    RelayState,
};

const DEFAULT_PAGE_SIZE: usize = 50;

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/v1/presence", get(get_presence))
        .route("/v1/users/{user_id}/conversations/{other_id}/messages", get(get_history))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceEnvelope {
    pub online: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_presence(State(state): State<RelayState>) -> Json<PresenceEnvelope> {
    Json(PresenceEnvelope { online: state.presence.online().await })
}

async fn get_history(
    State(state): State<RelayState>,
    Path((user_id, other_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(state.messages.history_limit());
    if limit == 0 {
        return RelayError::new(ErrorCode::ValidationFailed, "limit must be at least 1")
            .into_response();
    }

    let messages = state.messages.history(&user_id, &other_id, limit).await;
    Json(HistoryPage { messages }).into_response()
}
