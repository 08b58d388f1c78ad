use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 浏览器 Web Push 订阅，endpoint 全局唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: String,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 移动端推送令牌，token 全局唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobilePushToken {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 与浏览器 `PushSubscription.toJSON()` 的结构一致
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebSubscriptionRequest {
    #[validate(url(message = "Endpoint must be a valid URL"))]
    pub endpoint: String,
    pub expiration_time: Option<i64>,
    #[validate]
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PushKeys {
    #[validate(length(min = 1, message = "p256dh is required"))]
    pub p256dh: String,
    #[validate(length(min = 1, message = "auth is required"))]
    pub auth: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterMobileTokenRequest {
    #[validate(length(min = 1, max = 4096, message = "Token must be 1-4096 characters"))]
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub has_active_subscriptions: bool,
    pub web_subscriptions: usize,
    pub mobile_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_subscription_json_shape() {
        let request: RegisterWebSubscriptionRequest = serde_json::from_value(serde_json::json!({
            "endpoint": "https://fcm.googleapis.com/fcm/send/abc",
            "expirationTime": null,
            "keys": { "p256dh": "BKey", "auth": "secret" }
        }))
        .unwrap();

        assert_eq!(request.keys.auth, "secret");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_url_endpoint() {
        let request = RegisterWebSubscriptionRequest {
            endpoint: "not a url".to_string(),
            expiration_time: None,
            keys: PushKeys {
                p256dh: "BKey".to_string(),
                auth: "secret".to_string(),
            },
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_mobile_token() {
        let request = RegisterMobileTokenRequest { token: String::new() };
        assert!(request.validate().is_err());
    }
}
