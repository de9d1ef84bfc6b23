//! REST endpoints for the sync protocol.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::server::store::RemoteStore;
use crate::store::parse_datetime;
use crate::sync::protocol::PushOp;

/// Shared state for sync routes.
#[derive(Clone)]
pub struct SyncRouteState {
    pub store: Arc<RemoteStore>,
}

fn user_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("default-user")
        .to_string()
}

/// POST /sync/push
///
/// Body: JSON array of ops. Applies each op idempotently and returns the
/// op ids that were evaluated, so the client can drop them from its
/// outbox. Ops that fail to parse (future clients) are skipped and left
/// un-acked.
async fn push(
    State(state): State<SyncRouteState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(raw_ops) = body.as_array() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Payload must be an array."})),
        )
            .into_response();
    };
    let user_id = user_id_from(&headers);
    if let Err(error) = state.store.ensure_user(&user_id).await {
        warn!(%error, "ensure_user failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": error.to_string()})),
        )
            .into_response();
    }

    let ops: Vec<PushOp> = raw_ops
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .filter(|op: &PushOp| !op.op_id.is_empty())
        .collect();
    debug!(user = %user_id, received = raw_ops.len(), parsed = ops.len(), "Push");

    match state.store.apply_ops(&user_id, &ops).await {
        Ok(acked) => Json(json!({ "acked": acked })).into_response(),
        Err(error) => {
            warn!(%error, "Push apply failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": error.to_string()})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PullParams {
    cursor: Option<String>,
}

/// GET /sync/pull?cursor=<ISO-8601>
///
/// Returns every row the user touched since the cursor, plus a fresh
/// cursor taken from server time at response construction.
async fn pull(
    State(state): State<SyncRouteState>,
    headers: HeaderMap,
    Query(params): Query<PullParams>,
) -> impl IntoResponse {
    let user_id = user_id_from(&headers);
    if let Err(error) = state.store.ensure_user(&user_id).await {
        warn!(%error, "ensure_user failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": error.to_string()})),
        )
            .into_response();
    }
    let cursor = parse_datetime(
        params
            .cursor
            .as_deref()
            .unwrap_or("1970-01-01T00:00:00.000Z"),
    );
    debug!(user = %user_id, cursor = %cursor, "Pull");

    match state.store.pull_rows(&user_id, cursor).await {
        Ok(payload) => Json(payload).into_response(),
        Err(error) => {
            warn!(%error, "Pull query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": error.to_string()})),
            )
                .into_response()
        }
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not Found"})))
}

/// Build the sync endpoint router. Browser clients hit this cross-origin,
/// so it carries the same permissive CORS surface the endpoint always had.
pub fn sync_routes(state: SyncRouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-user-id")]);
    Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}
