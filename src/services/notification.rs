use crate::{
    error::{AppError, Result},
    models::notification::{Notification, NotificationListQuery, NotificationPage},
    services::repository::NotificationStore,
};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// 通知读取侧：列表、未读数与已读标记
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, user_id: &str, query: &NotificationListQuery) -> Result<NotificationPage> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * limit;

        let notifications = self
            .store
            .list_notifications(user_id, offset, limit, query.unread_only.unwrap_or(false))
            .await?;
        let unread_count = self.store.count_unread(user_id).await?;

        Ok(NotificationPage {
            notifications,
            page,
            limit,
            unread_count,
        })
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<u64> {
        self.store.count_unread(user_id).await
    }

    /// 只能标记自己的通知，否则按不存在处理
    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<Notification> {
        let mut notification = self
            .store
            .get_notification(notification_id)
            .await?
            .filter(|n| n.target_user_id == user_id)
            .ok_or_else(|| AppError::not_found("Notification"))?;

        if !notification.is_read {
            self.store.mark_read(notification_id).await?;
            notification.is_read = true;
            debug!("User {} read notification {}", user_id, notification_id);
        }
        Ok(notification)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let updated = self.store.mark_all_read(user_id).await?;
        debug!("User {} marked {} notification(s) read", user_id, updated);
        Ok(updated)
    }
}
