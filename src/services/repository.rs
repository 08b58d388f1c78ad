//! 持久化边界。通知、订阅、令牌与用户资料的读写都经由这些 trait，
//! 具体实现见 `database`（SurrealDB）与 `memory`（进程内）。

use crate::{
    error::Result,
    models::{
        notification::Notification,
        push_subscription::{MobilePushToken, PushSubscription},
        user::ActorProfile,
    },
};
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>>;

    /// 按 `created_at` 倒序分页
    async fn list_notifications(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<Notification>>;

    async fn mark_read(&self, id: &str) -> Result<()>;

    async fn mark_all_read(&self, user_id: &str) -> Result<u64>;

    async fn count_unread(&self, user_id: &str) -> Result<u64>;
}

#[async_trait]
pub trait WebSubscriptionStore: Send + Sync {
    async fn list_active_web(&self, user_id: &str) -> Result<Vec<PushSubscription>>;

    /// 以 endpoint 为键写入；已存在则重新激活并转移给 `user_id`
    async fn upsert_web(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<PushSubscription>;

    /// 返回本次调用是否真的改变了状态
    async fn deactivate_web(&self, id: &str) -> Result<bool>;

    async fn delete_web(&self, user_id: &str, id: &str) -> Result<bool>;

    async fn delete_all_web(&self, user_id: &str) -> Result<u64>;
}

#[async_trait]
pub trait MobileTokenStore: Send + Sync {
    async fn list_active_mobile(&self, user_id: &str) -> Result<Vec<MobilePushToken>>;

    /// 以 token 为键写入；已存在则重新激活并转移给 `user_id`
    async fn upsert_mobile(&self, user_id: &str, token: &str) -> Result<MobilePushToken>;

    async fn deactivate_mobile(&self, id: &str) -> Result<bool>;

    async fn delete_mobile(&self, user_id: &str, id: &str) -> Result<bool>;

    async fn delete_all_mobile(&self, user_id: &str) -> Result<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn find_actor(&self, user_id: &str) -> Result<Option<ActorProfile>>;
}
