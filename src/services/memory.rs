use crate::{
    error::Result,
    models::{
        notification::Notification,
        push_subscription::{MobilePushToken, PushSubscription},
        user::ActorProfile,
    },
    services::repository::{ActorDirectory, MobileTokenStore, NotificationStore, WebSubscriptionStore},
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

/// 进程内存储，实现全部持久化 trait。
///
/// 订阅按 endpoint、令牌按 token 作为 DashMap 的键，
/// 同一分片锁内完成查找与写入，因此唯一性在任意时刻成立。
#[derive(Default)]
pub struct MemoryStore {
    notifications: DashMap<String, Notification>,
    web_subscriptions: DashMap<String, PushSubscription>,
    mobile_tokens: DashMap<String, MobilePushToken>,
    actors: DashMap<String, ActorProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_actor(&self, actor: ActorProfile) {
        self.actors.insert(actor.user_id.clone(), actor);
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    /// 包含已停用的行
    pub fn all_web_subscriptions(&self) -> Vec<PushSubscription> {
        self.web_subscriptions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn all_mobile_tokens(&self) -> Vec<MobilePushToken> {
        self.mobile_tokens.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        Ok(self.notifications.get(id).map(|n| n.clone()))
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut items: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.target_user_id == user_id && (!unread_only || !n.is_read))
            .map(|n| n.clone())
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        if let Some(mut notification) = self.notifications.get_mut(id) {
            notification.is_read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let mut updated = 0;
        for mut entry in self.notifications.iter_mut() {
            if entry.target_user_id == user_id && !entry.is_read {
                entry.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .notifications
            .iter()
            .filter(|n| n.target_user_id == user_id && !n.is_read)
            .count() as u64)
    }
}

#[async_trait]
impl WebSubscriptionStore for MemoryStore {
    async fn list_active_web(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        Ok(self
            .web_subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active)
            .map(|s| s.clone())
            .collect())
    }

    async fn upsert_web(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<PushSubscription> {
        let mut entry = self
            .web_subscriptions
            .entry(endpoint.to_string())
            .or_insert_with(|| PushSubscription {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                endpoint: endpoint.to_string(),
                p256dh: p256dh.to_string(),
                auth: auth.to_string(),
                is_active: true,
                created_at: Utc::now(),
            });

        let subscription = entry.value_mut();
        subscription.user_id = user_id.to_string();
        subscription.p256dh = p256dh.to_string();
        subscription.auth = auth.to_string();
        subscription.is_active = true;

        Ok(subscription.clone())
    }

    async fn deactivate_web(&self, id: &str) -> Result<bool> {
        for mut entry in self.web_subscriptions.iter_mut() {
            if entry.id == id {
                let changed = entry.is_active;
                entry.is_active = false;
                return Ok(changed);
            }
        }
        Ok(false)
    }

    async fn delete_web(&self, user_id: &str, id: &str) -> Result<bool> {
        let before = self.web_subscriptions.len();
        self.web_subscriptions
            .retain(|_, s| !(s.id == id && s.user_id == user_id));
        Ok(self.web_subscriptions.len() < before)
    }

    async fn delete_all_web(&self, user_id: &str) -> Result<u64> {
        let before = self.web_subscriptions.len();
        self.web_subscriptions.retain(|_, s| s.user_id != user_id);
        Ok((before - self.web_subscriptions.len()) as u64)
    }
}

#[async_trait]
impl MobileTokenStore for MemoryStore {
    async fn list_active_mobile(&self, user_id: &str) -> Result<Vec<MobilePushToken>> {
        Ok(self
            .mobile_tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.is_active)
            .map(|t| t.clone())
            .collect())
    }

    async fn upsert_mobile(&self, user_id: &str, token: &str) -> Result<MobilePushToken> {
        let mut entry = self
            .mobile_tokens
            .entry(token.to_string())
            .or_insert_with(|| MobilePushToken {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                token: token.to_string(),
                is_active: true,
                created_at: Utc::now(),
            });

        let record = entry.value_mut();
        record.user_id = user_id.to_string();
        record.is_active = true;

        Ok(record.clone())
    }

    async fn deactivate_mobile(&self, id: &str) -> Result<bool> {
        for mut entry in self.mobile_tokens.iter_mut() {
            if entry.id == id {
                let changed = entry.is_active;
                entry.is_active = false;
                return Ok(changed);
            }
        }
        Ok(false)
    }

    async fn delete_mobile(&self, user_id: &str, id: &str) -> Result<bool> {
        let before = self.mobile_tokens.len();
        self.mobile_tokens
            .retain(|_, t| !(t.id == id && t.user_id == user_id));
        Ok(self.mobile_tokens.len() < before)
    }

    async fn delete_all_mobile(&self, user_id: &str) -> Result<u64> {
        let before = self.mobile_tokens.len();
        self.mobile_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - self.mobile_tokens.len()) as u64)
    }
}

#[async_trait]
impl ActorDirectory for MemoryStore {
    async fn find_actor(&self, user_id: &str) -> Result<Option<ActorProfile>> {
        Ok(self.actors.get(user_id).map(|a| a.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn notification(id: &str, user_id: &str, minutes_ago: i64) -> Notification {
        Notification {
            id: id.to_string(),
            target_user_id: user_id.to_string(),
            actor_id: "actor".to_string(),
            notification_type: crate::models::notification::NotificationType::Like,
            status_id: Some(1),
            message_id: None,
            is_read: false,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paginated() {
        let store = MemoryStore::new();
        store.insert_notification(&notification("old", "b", 10)).await.unwrap();
        store.insert_notification(&notification("new", "b", 1)).await.unwrap();
        store.insert_notification(&notification("mid", "b", 5)).await.unwrap();
        store.insert_notification(&notification("other", "c", 0)).await.unwrap();

        let first = store.list_notifications("b", 0, 2, false).await.unwrap();
        let ids: Vec<_> = first.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        let second = store.list_notifications("b", 2, 2, false).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "old");
    }

    #[tokio::test]
    async fn test_mark_all_read_counts_only_unread() {
        let store = MemoryStore::new();
        store.insert_notification(&notification("a", "b", 2)).await.unwrap();
        store.insert_notification(&notification("c", "b", 1)).await.unwrap();
        store.mark_read("a").await.unwrap();

        assert_eq!(store.count_unread("b").await.unwrap(), 1);
        assert_eq!(store.mark_all_read("b").await.unwrap(), 1);
        assert_eq!(store.count_unread("b").await.unwrap(), 0);
        assert_eq!(store.mark_all_read("b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_id_and_created_at() {
        let store = MemoryStore::new();
        let first = store.upsert_web("a", "https://push.example/1", "k", "s").await.unwrap();
        store.deactivate_web(&first.id).await.unwrap();

        let second = store.upsert_web("b", "https://push.example/1", "k2", "s2").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.user_id, "b");
        assert!(second.is_active);
        assert_eq!(store.all_web_subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_respects_owner() {
        let store = MemoryStore::new();
        let token = store.upsert_mobile("a", "ExponentPushToken[1]").await.unwrap();

        assert!(!store.delete_mobile("intruder", &token.id).await.unwrap());
        assert!(store.delete_mobile("a", &token.id).await.unwrap());
        assert!(store.all_mobile_tokens().is_empty());
    }
}
