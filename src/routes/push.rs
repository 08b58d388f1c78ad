use crate::{
    error::{AppError, Result},
    models::{
        delivery::DeliveryReport,
        push_subscription::*,
        response::ApiResponse,
    },
    services::auth::AuthUser,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vapid-public-key", get(vapid_public_key))
        .route("/web", post(register_web))
        .route("/mobile", post(register_mobile))
        .route("/subscriptions", delete(unsubscribe_all))
        .route("/subscriptions/:id", delete(unsubscribe))
        .route("/status", get(subscription_status))
        .route("/test", post(send_test))
}

/// 浏览器订阅前获取 applicationServerKey，无需登录
/// GET /api/notifications/push/vapid-public-key
async fn vapid_public_key(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let public_key = state
        .vapid_public_key
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Web push is not enabled".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "data": { "public_key": public_key }
    })))
}

/// POST /api/notifications/push/web
async fn register_web(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<RegisterWebSubscriptionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PushSubscription>>)> {
    request.validate()?;
    debug!("Registering web push subscription for user: {}", user.id);

    let subscription = state
        .registry
        .register_web_subscription(&user.id, &request.endpoint, &request.keys.p256dh, &request.keys.auth)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            subscription,
            "Web push subscription registered".to_string(),
        )),
    ))
}

/// POST /api/notifications/push/mobile
async fn register_mobile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<RegisterMobileTokenRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MobilePushToken>>)> {
    request.validate()?;
    debug!("Registering mobile push token for user: {}", user.id);

    let token = state.registry.register_mobile_token(&user.id, &request.token).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            token,
            "Mobile push token registered".to_string(),
        )),
    ))
}

/// DELETE /api/notifications/push/subscriptions/:id
async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.registry.unsubscribe(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/notifications/push/subscriptions
async fn unsubscribe_all(State(state): State<Arc<AppState>>, user: AuthUser) -> Result<Json<Value>> {
    let removed = state.registry.unsubscribe_all(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "removed": removed }
    })))
}

/// GET /api/notifications/push/status
async fn subscription_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ApiResponse<SubscriptionStatus>>> {
    let status = state.registry.status(&user.id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// 等待测试推送全部结束后返回各通道结果
/// POST /api/notifications/push/test
async fn send_test(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ApiResponse<DeliveryReport>>> {
    let report = state.dispatcher.send_test(&user.id).await?.settled().await;
    Ok(Json(ApiResponse::success(report)))
}
