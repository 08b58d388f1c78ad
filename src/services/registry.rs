use crate::{
    error::{AppError, Result},
    models::push_subscription::{MobilePushToken, PushSubscription, SubscriptionStatus},
    services::repository::{MobileTokenStore, WebSubscriptionStore},
};
use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const P256DH_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const MAX_MOBILE_TOKEN_LEN: usize = 4096;

/// 订阅注册表：管理用户的 Web Push 订阅与移动端令牌，并负责失效清理
#[derive(Clone)]
pub struct SubscriptionRegistry {
    web: Arc<dyn WebSubscriptionStore>,
    mobile: Arc<dyn MobileTokenStore>,
}

impl SubscriptionRegistry {
    pub fn new(web: Arc<dyn WebSubscriptionStore>, mobile: Arc<dyn MobileTokenStore>) -> Self {
        Self { web, mobile }
    }

    pub async fn list_active_web(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        self.web.list_active_web(user_id).await
    }

    pub async fn list_active_mobile(&self, user_id: &str) -> Result<Vec<MobilePushToken>> {
        self.mobile.list_active_mobile(user_id).await
    }

    /// 注册浏览器订阅；同一 endpoint 再次注册会被重新激活并归属到 `user_id`
    pub async fn register_web_subscription(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<PushSubscription> {
        validate_endpoint(endpoint)?;
        validate_key(p256dh, P256DH_LEN, "p256dh")?;
        validate_key(auth, AUTH_SECRET_LEN, "auth")?;

        let subscription = self.web.upsert_web(user_id, endpoint, p256dh, auth).await?;
        info!(
            "Registered web push subscription {} for user {}",
            subscription.id, user_id
        );
        Ok(subscription)
    }

    /// 注册移动端令牌；同一 token 再次注册会被重新激活并归属到 `user_id`
    pub async fn register_mobile_token(&self, user_id: &str, token: &str) -> Result<MobilePushToken> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_MOBILE_TOKEN_LEN {
            return Err(AppError::validation("Mobile push token must be 1-4096 characters"));
        }

        let record = self.mobile.upsert_mobile(user_id, token).await?;
        info!("Registered mobile push token {} for user {}", record.id, user_id);
        Ok(record)
    }

    /// 停用 Web 订阅，重复调用是空操作
    pub async fn deactivate_web(&self, subscription_id: &str) -> Result<()> {
        if self.web.deactivate_web(subscription_id).await? {
            info!("Deactivated web push subscription {}", subscription_id);
        } else {
            debug!("Web push subscription {} already inactive", subscription_id);
        }
        Ok(())
    }

    /// 停用移动端令牌，重复调用是空操作
    pub async fn deactivate_mobile(&self, token_id: &str) -> Result<()> {
        if self.mobile.deactivate_mobile(token_id).await? {
            info!("Deactivated mobile push token {}", token_id);
        } else {
            debug!("Mobile push token {} already inactive", token_id);
        }
        Ok(())
    }

    /// 删除调用者自己的订阅或令牌
    pub async fn unsubscribe(&self, user_id: &str, id: &str) -> Result<()> {
        if self.web.delete_web(user_id, id).await? {
            info!("User {} removed web push subscription {}", user_id, id);
            return Ok(());
        }
        if self.mobile.delete_mobile(user_id, id).await? {
            info!("User {} removed mobile push token {}", user_id, id);
            return Ok(());
        }
        Err(AppError::not_found("Subscription"))
    }

    /// 删除用户全部订阅与令牌，返回删除数量
    pub async fn unsubscribe_all(&self, user_id: &str) -> Result<u64> {
        let web = self.web.delete_all_web(user_id).await?;
        let mobile = self.mobile.delete_all_mobile(user_id).await?;
        info!(
            "User {} removed all push registrations ({} web, {} mobile)",
            user_id, web, mobile
        );
        Ok(web + mobile)
    }

    pub async fn has_active_subscriptions(&self, user_id: &str) -> Result<bool> {
        if !self.web.list_active_web(user_id).await?.is_empty() {
            return Ok(true);
        }
        Ok(!self.mobile.list_active_mobile(user_id).await?.is_empty())
    }

    pub async fn status(&self, user_id: &str) -> Result<SubscriptionStatus> {
        let web = self.web.list_active_web(user_id).await?.len();
        let mobile = self.mobile.list_active_mobile(user_id).await?.len();
        Ok(SubscriptionStatus {
            has_active_subscriptions: web + mobile > 0,
            web_subscriptions: web,
            mobile_tokens: mobile,
        })
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)
        .map_err(|_| AppError::validation("Push endpoint must be an absolute URL"))?;

    let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        _ => Err(AppError::validation("Push endpoint must use https")),
    }
}

/// 浏览器给出的密钥是 base64url，有无填充都可能出现
fn validate_key(value: &str, expected_len: usize, field: &str) -> Result<()> {
    let decoded = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(value))
        .map_err(|_| AppError::Validation(format!("{} must be base64url encoded", field)))?;

    if decoded.len() != expected_len {
        return Err(AppError::Validation(format!(
            "{} must decode to {} bytes",
            field, expected_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryStore;

    const P256DH: &str =
        "BKQiEuY0uiXmkGA2yl8WCeagS47O3gcLkbuWD0ihI82DIXXlEgUNTCn5MMMiW4UEDXvVDT-gjkjrSrmqqGKdF-s";
    const AUTH: &str = "rCmbIf8AZTEOnsAQ81L41g";

    fn registry() -> (Arc<MemoryStore>, SubscriptionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = SubscriptionRegistry::new(store.clone(), store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn test_upsert_reassigns_endpoint_to_new_user() {
        let (store, registry) = registry();
        let endpoint = "https://push.example.com/sub/1";

        let original = registry
            .register_web_subscription("alice", endpoint, P256DH, AUTH)
            .await
            .unwrap();
        registry.deactivate_web(&original.id).await.unwrap();

        let reassigned = registry
            .register_web_subscription("bob", endpoint, P256DH, AUTH)
            .await
            .unwrap();

        let rows = store.all_web_subscriptions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "bob");
        assert!(rows[0].is_active);
        assert_eq!(reassigned.id, original.id);
        assert!(registry.list_active_web("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let (store, registry) = registry();
        let sub = registry
            .register_web_subscription("alice", "https://push.example.com/sub/2", P256DH, AUTH)
            .await
            .unwrap();

        registry.deactivate_web(&sub.id).await.unwrap();
        registry.deactivate_web(&sub.id).await.unwrap();
        registry.deactivate_web("missing").await.unwrap();

        let rows = store.all_web_subscriptions();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_active);
    }

    #[tokio::test]
    async fn test_concurrent_deactivate_races_safely() {
        let (store, registry) = registry();
        let token = registry
            .register_mobile_token("alice", "ExponentPushToken[abc]")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            registry.deactivate_mobile(&token.id),
            registry.deactivate_mobile(&token.id)
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        let rows = store.all_mobile_tokens();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_active);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_counts_both_transports() {
        let (_store, registry) = registry();
        assert_eq!(registry.unsubscribe_all("alice").await.unwrap(), 0);

        registry
            .register_web_subscription("alice", "https://push.example.com/sub/3", P256DH, AUTH)
            .await
            .unwrap();
        registry
            .register_mobile_token("alice", "ExponentPushToken[1]")
            .await
            .unwrap();
        registry
            .register_mobile_token("bob", "ExponentPushToken[2]")
            .await
            .unwrap();

        assert!(registry.has_active_subscriptions("alice").await.unwrap());
        assert_eq!(registry.unsubscribe_all("alice").await.unwrap(), 2);
        assert!(!registry.has_active_subscriptions("alice").await.unwrap());
        assert!(registry.has_active_subscriptions("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_unsubscribe_rejects_foreign_ids() {
        let (_store, registry) = registry();
        let token = registry
            .register_mobile_token("alice", "ExponentPushToken[1]")
            .await
            .unwrap();

        let err = registry.unsubscribe("mallory", &token.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        registry.unsubscribe("alice", &token.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let (_store, registry) = registry();

        let err = registry
            .register_web_subscription("alice", "http://push.example.com/x", P256DH, AUTH)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = registry
            .register_web_subscription("alice", "https://push.example.com/x", "short", AUTH)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = registry.register_mobile_token("alice", "   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(registry
            .register_web_subscription("alice", "http://localhost:8080/push", P256DH, AUTH)
            .await
            .is_ok());
    }

    #[test]
    fn test_validate_key_accepts_padded_input() {
        assert!(validate_key("rCmbIf8AZTEOnsAQ81L41g==", AUTH_SECRET_LEN, "auth").is_ok());
        assert!(validate_key(AUTH, AUTH_SECRET_LEN, "auth").is_ok());
        assert!(validate_key(AUTH, P256DH_LEN, "p256dh").is_err());
    }
}
