use crate::{
    error::Result,
    models::{notification::*, response::ApiResponse},
    services::auth::AuthUser,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/:id/read", post(mark_read))
}

/// GET /api/notifications
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<ApiResponse<NotificationPage>>> {
    debug!("Listing notifications for user: {}", user.id);

    let page = state.notification_service.list(&user.id, &query).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /api/notifications/unread-count
async fn unread_count(State(state): State<Arc<AppState>>, user: AuthUser) -> Result<Json<Value>> {
    let count = state.notification_service.unread_count(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "unread_count": count }
    })))
}

/// POST /api/notifications/:id/read
async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(notification_id): Path<String>,
) -> Result<Json<ApiResponse<Notification>>> {
    let notification = state
        .notification_service
        .mark_read(&user.id, &notification_id)
        .await?;
    Ok(Json(ApiResponse::success(notification)))
}

/// POST /api/notifications/read-all
async fn mark_all_read(State(state): State<Arc<AppState>>, user: AuthUser) -> Result<Json<Value>> {
    let updated = state.notification_service.mark_all_read(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "updated": updated },
        "message": "All notifications marked as read"
    })))
}
