use crate::{
    error::{AppError, Result},
    models::notification::{DisplayPayload, Notification, NotificationType},
    services::repository::ActorDirectory,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// 通知工厂：生成权威通知记录与各通道共用的展示内容
#[derive(Clone)]
pub struct NotificationFactory {
    actors: Arc<dyn ActorDirectory>,
}

impl NotificationFactory {
    pub fn new(actors: Arc<dyn ActorDirectory>) -> Self {
        Self { actors }
    }

    pub async fn build(
        &self,
        target_user_id: &str,
        actor_id: &str,
        notification_type: NotificationType,
        status_id: Option<i64>,
        message_id: Option<i64>,
    ) -> Result<(Notification, DisplayPayload)> {
        let actor = self
            .actors
            .find_actor(actor_id)
            .await?
            .ok_or_else(|| AppError::ActorNotFound(actor_id.to_string()))?;

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            target_user_id: target_user_id.to_string(),
            actor_id: actor_id.to_string(),
            notification_type,
            status_id,
            message_id,
            is_read: false,
            created_at: Utc::now(),
        };

        let payload = display_payload(&notification, actor.display_label());
        Ok((notification, payload))
    }
}

/// 标题与正文，对所有类型都有定义
pub fn render_text(notification_type: NotificationType, actor_name: &str) -> (String, String) {
    match notification_type {
        NotificationType::Like => (
            "New like".to_string(),
            format!("{} liked your post", actor_name),
        ),
        NotificationType::ReplyOnStatus => (
            "New reply".to_string(),
            format!("{} replied to your post", actor_name),
        ),
        NotificationType::ReplyOnReply => (
            "New reply".to_string(),
            format!("{} replied to your comment", actor_name),
        ),
        NotificationType::Follow => (
            "New follower".to_string(),
            format!("{} started following you", actor_name),
        ),
        NotificationType::Message => (
            "New message".to_string(),
            format!("{} sent you a message", actor_name),
        ),
        NotificationType::Mention => (
            "New mention".to_string(),
            format!("{} mentioned you in a post", actor_name),
        ),
        NotificationType::Repost => (
            "New repost".to_string(),
            format!("{} reposted your post", actor_name),
        ),
        NotificationType::Quote => (
            "New quote".to_string(),
            format!("{} quoted your post", actor_name),
        ),
        NotificationType::Other => default_text(actor_name),
    }
}

fn default_text(actor_name: &str) -> (String, String) {
    (
        "New notification".to_string(),
        format!("You have a new notification from {}", actor_name),
    )
}

pub fn notification_tag(notification_id: &str) -> String {
    format!("notification-{}", notification_id)
}

fn display_payload(notification: &Notification, actor_name: &str) -> DisplayPayload {
    let (title, body) = render_text(notification.notification_type, actor_name);

    let mut data = Map::new();
    data.insert("id".to_string(), json!(notification.id));
    data.insert("actorId".to_string(), json!(notification.actor_id));
    data.insert("type".to_string(), json!(notification.notification_type.as_str()));
    data.insert(
        "statusId".to_string(),
        notification.status_id.map(Value::from).unwrap_or(Value::Null),
    );
    data.insert(
        "messageId".to_string(),
        notification.message_id.map(Value::from).unwrap_or(Value::Null),
    );

    DisplayPayload {
        title,
        body,
        tag: notification_tag(&notification.id),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::ActorProfile;
    use crate::services::repository::MockActorDirectory;

    fn factory_with_actor() -> NotificationFactory {
        let mut actors = MockActorDirectory::new();
        actors.expect_find_actor().returning(|id| {
            Ok((id == "alice").then(|| ActorProfile {
                user_id: "alice".to_string(),
                username: "alice".to_string(),
                display_name: Some("Alice".to_string()),
            }))
        });
        NotificationFactory::new(Arc::new(actors))
    }

    #[test]
    fn test_every_type_has_title_and_body() {
        for kind in NotificationType::ALL {
            let (title, body) = render_text(kind, "Alice");
            assert!(!title.is_empty(), "{} has empty title", kind);
            assert!(!body.is_empty(), "{} has empty body", kind);
            assert!(body.contains("Alice"));
        }
    }

    #[test]
    fn test_unknown_type_uses_default_text() {
        let kind: NotificationType = serde_json::from_str("\"anniversary\"").unwrap();
        assert_eq!(render_text(kind, "Alice"), default_text("Alice"));
    }

    #[tokio::test]
    async fn test_build_populates_record_and_payload() {
        let factory = factory_with_actor();
        let (notification, payload) = factory
            .build("bob", "alice", NotificationType::Like, Some(42), None)
            .await
            .unwrap();

        assert_eq!(notification.target_user_id, "bob");
        assert_eq!(notification.notification_type, NotificationType::Like);
        assert_eq!(notification.status_id, Some(42));
        assert!(!notification.is_read);

        assert_eq!(payload.title, "New like");
        assert_eq!(payload.body, "Alice liked your post");
        assert_eq!(payload.tag, format!("notification-{}", notification.id));
        assert_eq!(payload.data["id"], json!(notification.id));
        assert_eq!(payload.data["actorId"], json!("alice"));
        assert_eq!(payload.data["type"], json!("like"));
        assert_eq!(payload.data["statusId"], json!(42));
        assert_eq!(payload.data["messageId"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_actor_fails() {
        let factory = factory_with_actor();
        let err = factory
            .build("bob", "ghost", NotificationType::Follow, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ActorNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_self_notification_is_allowed() {
        let factory = factory_with_actor();
        let (notification, _) = factory
            .build("alice", "alice", NotificationType::Mention, Some(7), None)
            .await
            .unwrap();
        assert_eq!(notification.target_user_id, notification.actor_id);
    }
}
