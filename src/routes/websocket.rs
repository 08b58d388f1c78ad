use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::{Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::{
    error::Result,
    models::{response::ApiResponse, websocket::WebSocketStats},
    services::auth::AuthUser,
    state::AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // WebSocket连接端点
        .route("/connect", get(websocket_handler))
        // 统计信息
        .route("/stats", get(get_websocket_stats))
}

/// 浏览器无法为 WebSocket 设置请求头，令牌通过查询参数传入
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: String,
}

/// WebSocket连接处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response> {
    let claims = state.auth_service.verify_jwt(&query.token)?;
    info!("WebSocket upgrade request from user: {}", claims.sub);

    let websocket_service = state.websocket_service.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        websocket_service.handle_connection(socket, claims.sub).await
    }))
}

/// GET /api/notifications/ws/stats
async fn get_websocket_stats(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<WebSocketStats>>> {
    Ok(Json(ApiResponse::success(state.websocket_service.get_stats())))
}
