use crate::{
    error::Result,
    models::notification::DispatchRequest,
    services::auth::ServiceCaller,
    state::AppState,
};
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// 供其他服务调用的内部接口，使用服务令牌认证
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/dispatch", post(dispatch))
}

/// POST /internal/notifications/dispatch
async fn dispatch(
    State(state): State<Arc<AppState>>,
    _caller: ServiceCaller,
    Json(request): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let id = state
        .dispatcher
        .dispatch(
            &request.target_user_id,
            &request.actor_id,
            request.notification_type,
            request.status_id,
            request.message_id,
        )
        .await?;

    info!(
        "Dispatched {} notification {} to user {}",
        request.notification_type, id, request.target_user_id
    );

    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id }))))
}
