use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 通知记录（权威数据，投递结果不影响其存在）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub target_user_id: String,
    pub actor_id: String,
    pub notification_type: NotificationType,
    pub status_id: Option<i64>,
    pub message_id: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    ReplyOnStatus,
    ReplyOnReply,
    Follow,
    Message,
    Mention,
    Repost,
    Quote,
    /// 无法识别的类型，使用默认文案
    #[serde(other)]
    Other,
}

impl NotificationType {
    pub const ALL: [NotificationType; 9] = [
        NotificationType::Like,
        NotificationType::ReplyOnStatus,
        NotificationType::ReplyOnReply,
        NotificationType::Follow,
        NotificationType::Message,
        NotificationType::Mention,
        NotificationType::Repost,
        NotificationType::Quote,
        NotificationType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::ReplyOnStatus => "reply_on_status",
            NotificationType::ReplyOnReply => "reply_on_reply",
            NotificationType::Follow => "follow",
            NotificationType::Message => "message",
            NotificationType::Mention => "mention",
            NotificationType::Repost => "repost",
            NotificationType::Quote => "quote",
            NotificationType::Other => "other",
        }
    }

    /// 宽松解析，未知值落到 `Other`
    pub fn parse_lossy(value: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .unwrap_or(NotificationType::Other)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 所有通道共用的展示内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub data: Map<String, Value>,
}

/// 内部派发请求（由点赞、回复、关注等业务动作发起）
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub target_user_id: String,
    pub actor_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub status_id: Option<i64>,
    pub message_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub unread_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub page: usize,
    pub limit: usize,
    pub unread_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_deserializes_to_other() {
        let kind: NotificationType = serde_json::from_str("\"poll_ended\"").unwrap();
        assert_eq!(kind, NotificationType::Other);

        let kind: NotificationType = serde_json::from_str("\"reply_on_reply\"").unwrap();
        assert_eq!(kind, NotificationType::ReplyOnReply);
    }

    #[test]
    fn test_parse_lossy_matches_as_str() {
        for kind in NotificationType::ALL {
            assert_eq!(NotificationType::parse_lossy(kind.as_str()), kind);
        }
        assert_eq!(NotificationType::parse_lossy("boost"), NotificationType::Other);
    }
}
