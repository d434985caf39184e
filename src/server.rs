use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::change::ChangeBatch;
use crate::error::Disposition;
use crate::objects::{ObjectNotification, ObjectReplicator};
use crate::records::RecordReplicator;

/// The two pipelines, constructed once and shared by every invocation
pub struct AppState {
    pub records: RecordReplicator,
    pub objects: ObjectReplicator,
}

/// Build the invocation router. Triggers deliver their event payloads as
/// JSON POST bodies, one invocation per request.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invocations/records", post(records_handler))
        .route("/invocations/objects", post(objects_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

/// Always answers 200: per-record failures live inside the response's
/// status code (207) and outcome list
#[tracing::instrument(skip_all, fields(invocation_id = %Uuid::new_v4()))]
async fn records_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(batch): Json<ChangeBatch>,
) -> impl IntoResponse {
    let report = state.records.replicate_batch(&batch).await;
    Json(json!({
        "response": report.response(),
        "outcomes": report.outcomes,
    }))
}

#[tracing::instrument(skip_all, fields(invocation_id = %Uuid::new_v4()))]
async fn objects_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(notification): Json<ObjectNotification>,
) -> Response {
    match state.objects.replicate_notification(&notification).await {
        Ok(response) => (StatusCode::OK, Json(json!({ "response": response }))).into_response(),
        Err(error) => {
            let status = match error.disposition() {
                Disposition::Retry => StatusCode::SERVICE_UNAVAILABLE,
                Disposition::Discard => StatusCode::UNPROCESSABLE_ENTITY,
            };
            tracing::error!(%error, %status, "Object replication failed");
            (
                status,
                Json(json!({ "error": error.to_string(), "retry": error.is_retryable() })),
            )
                .into_response()
        }
    }
}
