use crate::{
    config::Config,
    error::Result,
    models::{
        notification::{Notification, NotificationType},
        push_subscription::{MobilePushToken, PushSubscription},
        user::ActorProfile,
    },
    services::repository::{ActorDirectory, MobileTokenStore, NotificationStore, WebSubscriptionStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use surrealdb::{
    engine::remote::http::{Client, Http},
    opt::auth::Root,
    Response, Surreal,
};
use tracing::{debug, error, info};

const NOTIFICATION_FIELDS: &str = "meta::id(id) AS id, target_user_id, actor_id, notification_type, \
     status_id, message_id, is_read, created_at";
const WEB_SUBSCRIPTION_FIELDS: &str =
    "meta::id(id) AS id, user_id, endpoint, p256dh, auth, is_active, created_at";
const MOBILE_TOKEN_FIELDS: &str = "meta::id(id) AS id, user_id, token, is_active, created_at";

/// 时间字段以 datetime 类型落库，`ORDER BY created_at` 按时间而非字符串比较
const INSERT_NOTIFICATION: &str = r#"
    CREATE type::thing('notification', $id) CONTENT {
        target_user_id: $target_user_id,
        actor_id: $actor_id,
        notification_type: $notification_type,
        status_id: $status_id,
        message_id: $message_id,
        is_read: false,
        created_at: <datetime>$created_at
    }
"#;

/// 数据库服务
#[derive(Clone)]
pub struct Database {
    client: Surreal<Client>,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let address = config
            .database_url
            .trim_start_matches("http://")
            .trim_start_matches("https://");

        let client = Surreal::new::<Http>(address).await?;
        client
            .signin(Root {
                username: &config.database_username,
                password: &config.database_password,
            })
            .await?;
        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self { client })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.client.query("INFO FOR DB").await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(e.into())
            }
        }
    }

    /// 执行带参数的查询，并检查每条语句的错误
    pub async fn query_with_params<P>(&self, sql: &str, params: P) -> Result<Response>
    where
        P: Serialize,
    {
        debug!("Executing query: {}", sql);
        let response = self.client.query(sql).bind(params).await?;
        Ok(response.check()?)
    }
}

/// 由唯一键（endpoint / token）派生记录ID，唯一约束由记录ID本身保证
fn record_key(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct NotificationRow {
    id: String,
    target_user_id: String,
    actor_id: String,
    notification_type: String,
    status_id: Option<i64>,
    message_id: Option<i64>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            target_user_id: row.target_user_id,
            actor_id: row.actor_id,
            notification_type: NotificationType::parse_lossy(&row.notification_type),
            status_id: row.status_id,
            message_id: row.message_id,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl NotificationStore for Database {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.query_with_params(
            INSERT_NOTIFICATION,
            json!({
                "id": notification.id,
                "target_user_id": notification.target_user_id,
                "actor_id": notification.actor_id,
                "notification_type": notification.notification_type.as_str(),
                "status_id": notification.status_id,
                "message_id": notification.message_id,
                "created_at": notification.created_at,
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        let sql = format!(
            "SELECT {} FROM notification WHERE meta::id(id) = $id LIMIT 1",
            NOTIFICATION_FIELDS
        );
        let mut response = self.query_with_params(&sql, json!({ "id": id })).await?;
        let rows: Vec<NotificationRow> = response.take(0)?;
        Ok(rows.into_iter().next().map(Notification::from))
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let unread_filter = if unread_only { "AND is_read = false" } else { "" };
        let sql = format!(
            "SELECT {} FROM notification WHERE target_user_id = $user_id {} \
             ORDER BY created_at DESC LIMIT $limit START $offset",
            NOTIFICATION_FIELDS, unread_filter
        );
        let mut response = self
            .query_with_params(
                &sql,
                json!({ "user_id": user_id, "limit": limit, "offset": offset }),
            )
            .await?;
        let rows: Vec<NotificationRow> = response.take(0)?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        self.query_with_params(
            "UPDATE notification SET is_read = true WHERE meta::id(id) = $id RETURN NONE",
            json!({ "id": id }),
        )
        .await?;
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        update_where(
            self,
            "notification",
            "is_read = true",
            "target_user_id = $user_id AND is_read = false",
            json!({ "user_id": user_id }),
        )
        .await
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64> {
        let mut response = self
            .query_with_params(
                "RETURN count((SELECT VALUE id FROM notification \
                 WHERE target_user_id = $user_id AND is_read = false))",
                json!({ "user_id": user_id }),
            )
            .await?;
        let count: Option<u64> = response.take(0)?;
        Ok(count.unwrap_or(0))
    }
}

#[async_trait]
impl WebSubscriptionStore for Database {
    async fn list_active_web(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let sql = format!(
            "SELECT {} FROM push_subscription WHERE user_id = $user_id AND is_active = true",
            WEB_SUBSCRIPTION_FIELDS
        );
        let mut response = self.query_with_params(&sql, json!({ "user_id": user_id })).await?;
        Ok(response.take(0)?)
    }

    async fn upsert_web(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<PushSubscription> {
        // 对具体记录ID执行 UPDATE 会在不存在时创建
        let sql = format!(
            r#"
                UPDATE type::thing('push_subscription', $key) SET
                    user_id = $user_id,
                    endpoint = $endpoint,
                    p256dh = $p256dh,
                    auth = $auth,
                    is_active = true,
                    created_at = created_at ?? <datetime>$now
                RETURN NONE;
                SELECT {} FROM type::thing('push_subscription', $key);
            "#,
            WEB_SUBSCRIPTION_FIELDS
        );
        let mut response = self
            .query_with_params(
                &sql,
                json!({
                    "key": record_key(endpoint),
                    "user_id": user_id,
                    "endpoint": endpoint,
                    "p256dh": p256dh,
                    "auth": auth,
                    "now": Utc::now(),
                }),
            )
            .await?;
        let rows: Vec<PushSubscription> = response.take(1)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| crate::error::AppError::internal("Failed to upsert push subscription"))
    }

    async fn deactivate_web(&self, id: &str) -> Result<bool> {
        // 已停用的行不匹配条件，重复调用不会报错
        Ok(update_where(
            self,
            "push_subscription",
            "is_active = false",
            "meta::id(id) = $id AND is_active = true",
            json!({ "id": id }),
        )
        .await?
            > 0)
    }

    async fn delete_web(&self, user_id: &str, id: &str) -> Result<bool> {
        Ok(delete_where(
            self,
            "push_subscription",
            "meta::id(id) = $id AND user_id = $user_id",
            json!({ "id": id, "user_id": user_id }),
        )
        .await?
            > 0)
    }

    async fn delete_all_web(&self, user_id: &str) -> Result<u64> {
        delete_where(
            self,
            "push_subscription",
            "user_id = $user_id",
            json!({ "user_id": user_id }),
        )
        .await
    }
}

#[async_trait]
impl MobileTokenStore for Database {
    async fn list_active_mobile(&self, user_id: &str) -> Result<Vec<MobilePushToken>> {
        let sql = format!(
            "SELECT {} FROM mobile_push_token WHERE user_id = $user_id AND is_active = true",
            MOBILE_TOKEN_FIELDS
        );
        let mut response = self.query_with_params(&sql, json!({ "user_id": user_id })).await?;
        Ok(response.take(0)?)
    }

    async fn upsert_mobile(&self, user_id: &str, token: &str) -> Result<MobilePushToken> {
        let sql = format!(
            r#"
                UPDATE type::thing('mobile_push_token', $key) SET
                    user_id = $user_id,
                    token = $token,
                    is_active = true,
                    created_at = created_at ?? <datetime>$now
                RETURN NONE;
                SELECT {} FROM type::thing('mobile_push_token', $key);
            "#,
            MOBILE_TOKEN_FIELDS
        );
        let mut response = self
            .query_with_params(
                &sql,
                json!({
                    "key": record_key(token),
                    "user_id": user_id,
                    "token": token,
                    "now": Utc::now(),
                }),
            )
            .await?;
        let rows: Vec<MobilePushToken> = response.take(1)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| crate::error::AppError::internal("Failed to upsert mobile push token"))
    }

    async fn deactivate_mobile(&self, id: &str) -> Result<bool> {
        // 已停用的行不匹配条件，重复调用不会报错
        Ok(update_where(
            self,
            "mobile_push_token",
            "is_active = false",
            "meta::id(id) = $id AND is_active = true",
            json!({ "id": id }),
        )
        .await?
            > 0)
    }

    async fn delete_mobile(&self, user_id: &str, id: &str) -> Result<bool> {
        Ok(delete_where(
            self,
            "mobile_push_token",
            "meta::id(id) = $id AND user_id = $user_id",
            json!({ "id": id, "user_id": user_id }),
        )
        .await?
            > 0)
    }

    async fn delete_all_mobile(&self, user_id: &str) -> Result<u64> {
        delete_where(
            self,
            "mobile_push_token",
            "user_id = $user_id",
            json!({ "user_id": user_id }),
        )
        .await
    }
}

#[async_trait]
impl ActorDirectory for Database {
    async fn find_actor(&self, user_id: &str) -> Result<Option<ActorProfile>> {
        let mut response = self
            .query_with_params(
                "SELECT user_id, username, display_name FROM user_profile \
                 WHERE user_id = $user_id LIMIT 1",
                json!({ "user_id": user_id }),
            )
            .await?;
        let rows: Vec<ActorProfile> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}

/// 更新匹配的记录并返回更新条数
async fn update_where(
    db: &Database,
    table: &str,
    assignment: &str,
    condition: &str,
    params: serde_json::Value,
) -> Result<u64> {
    let sql = format!(
        r#"
            LET $matched = (SELECT VALUE id FROM {table} WHERE {condition});
            UPDATE {table} SET {assignment} WHERE {condition} RETURN NONE;
            RETURN array::len($matched);
        "#,
    );
    let mut response = db.query_with_params(&sql, params).await?;
    let updated: Option<u64> = response.take(2)?;
    Ok(updated.unwrap_or(0))
}

/// 删除匹配的记录并返回删除条数
async fn delete_where(
    db: &Database,
    table: &str,
    condition: &str,
    params: serde_json::Value,
) -> Result<u64> {
    let sql = format!(
        r#"
            LET $matched = (SELECT VALUE id FROM {table} WHERE {condition});
            DELETE {table} WHERE {condition};
            RETURN array::len($matched);
        "#,
    );
    let mut response = db.query_with_params(&sql, params).await?;
    let removed: Option<u64> = response.take(2)?;
    Ok(removed.unwrap_or(0))
}
