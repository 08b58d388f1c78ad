pub mod internal;
pub mod notifications;
pub mod push;
pub mod websocket;

use crate::state::AppState;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

/// 组装全部路由；CORS 与请求追踪由调用方在外层添加
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/notifications/push", push::router())
        .nest("/api/notifications/ws", websocket::router())
        .nest("/api/notifications", notifications::router())
        .nest("/internal/notifications", internal::router())
        .layer(Extension(state.auth_service.clone()))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "notify-fanout is running!"
}
