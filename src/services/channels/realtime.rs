use super::DeliveryChannel;
use crate::{
    error::Result,
    models::{
        delivery::DeliveryOutcome,
        notification::DisplayPayload,
        websocket::{user_group, WebSocketMessage},
    },
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// 实时传输层提供的“按分组广播”原语
#[async_trait]
pub trait BroadcastGroup: Send + Sync {
    /// 返回消息被投入的连接数，零个监听者不算失败
    async fn broadcast_to_group(&self, group: &str, message: WebSocketMessage) -> Result<usize>;
}

/// 实时广播适配器：发往 `user_{id}` 分组，发出即视为送达，不重试
#[derive(Clone)]
pub struct RealtimeAdapter {
    transport: Arc<dyn BroadcastGroup>,
}

impl RealtimeAdapter {
    pub fn new(transport: Arc<dyn BroadcastGroup>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl DeliveryChannel<String> for RealtimeAdapter {
    fn name(&self) -> &'static str {
        "realtime"
    }

    async fn attempt(&self, user_id: &String, payload: &DisplayPayload) -> DeliveryOutcome {
        let group = user_group(user_id);
        let message = WebSocketMessage::notification(
            json!({
                "title": payload.title,
                "body": payload.body,
                "tag": payload.tag,
                "data": payload.data,
            }),
            user_id,
        );

        match self.transport.broadcast_to_group(&group, message).await {
            Ok(listeners) => {
                debug!("Broadcast to {} reached {} connection(s)", group, listeners);
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!("Broadcast to {} failed: {}", group, e);
                DeliveryOutcome::transient(e.to_string())
            }
        }
    }
}
