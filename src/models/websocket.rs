use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket消息类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketMessageType {
    // 系统消息
    Connect,
    Ping,
    Pong,
    Error,

    // 通知消息
    Notification,
}

/// WebSocket消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketMessage {
    pub id: String,
    pub message_type: WebSocketMessageType,
    pub group: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// 用户分组名，实时通道按此分组广播
pub fn user_group(user_id: &str) -> String {
    format!("user_{}", user_id)
}

/// 连接心跳
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

/// 错误消息
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
}

/// 在线统计
#[derive(Debug, Serialize)]
pub struct WebSocketStats {
    pub total_connections: usize,
    pub active_users: usize,
    pub groups: usize,
}

impl WebSocketMessage {
    /// 创建新消息
    pub fn new(message_type: WebSocketMessageType, data: serde_json::Value) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            message_type,
            group: None,
            data,
            timestamp: Utc::now(),
        }
    }

    /// 创建发往用户分组的通知消息
    pub fn notification(data: serde_json::Value, to_user_id: &str) -> Self {
        Self {
            group: Some(user_group(to_user_id)),
            ..Self::new(WebSocketMessageType::Notification, data)
        }
    }

    /// 创建错误消息
    pub fn error(code: &str, message: &str) -> Self {
        let error_data = ErrorMessage {
            code: code.to_string(),
            message: message.to_string(),
        };

        Self::new(
            WebSocketMessageType::Error,
            serde_json::to_value(error_data).unwrap_or_default(),
        )
    }

    /// 创建心跳消息
    pub fn pong(connection_id: &str, client_timestamp: Option<DateTime<Utc>>) -> Self {
        let heartbeat = HeartbeatMessage {
            connection_id: connection_id.to_string(),
            timestamp: Utc::now(),
            client_timestamp,
        };

        Self::new(
            WebSocketMessageType::Pong,
            serde_json::to_value(heartbeat).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_group_name() {
        assert_eq!(user_group("42"), "user_42");
    }

    #[test]
    fn test_websocket_message_creation() {
        let data = serde_json::json!({
            "title": "New like",
            "body": "alice liked your post"
        });

        let message = WebSocketMessage::notification(data.clone(), "42");

        assert_eq!(message.message_type, WebSocketMessageType::Notification);
        assert_eq!(message.group, Some("user_42".to_string()));
        assert_eq!(message.data, data);
    }

    #[test]
    fn test_error_message_creation() {
        let error_msg = WebSocketMessage::error("INVALID_MESSAGE", "Invalid JSON");

        assert_eq!(error_msg.message_type, WebSocketMessageType::Error);
        assert_eq!(error_msg.data["code"], "INVALID_MESSAGE");
        assert!(error_msg.group.is_none());
    }

    #[test]
    fn test_client_ping_without_data_parses() {
        let raw = r#"{"id":"c1","message_type":"ping","group":null,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let message: WebSocketMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.message_type, WebSocketMessageType::Ping);
        assert!(message.data.is_null());
    }
}
