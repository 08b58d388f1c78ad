use super::DeliveryChannel;
use crate::{
    config::Config,
    error::{AppError, Result},
    models::{delivery::DeliveryOutcome, notification::DisplayPayload, push_subscription::PushSubscription},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::{
    header::{CONTENT_ENCODING, CONTENT_TYPE},
    Client, StatusCode,
};
use std::time::Duration;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, PartialVapidSignatureBuilder, SubscriptionInfo, VapidSignatureBuilder,
    WebPushError, WebPushMessage, WebPushMessageBuilder,
};

/// Web Push 适配器。
///
/// 加密（aes128gcm）与 VAPID 签名交给 `web-push`，HTTP 请求由共享的
/// `reqwest` 客户端发出，以便按状态码区分永久失败与临时失败。
pub struct WebPushAdapter {
    http_client: Client,
    vapid: PartialVapidSignatureBuilder,
    public_key: String,
    subject: String,
    ttl: u32,
}

impl WebPushAdapter {
    /// 凭据在构造时加载并校验，失败属于启动期错误
    pub fn new(private_key: &str, subject: &str, ttl: u32, timeout: Duration) -> Result<Self> {
        let private_key = private_key.trim().trim_end_matches('=');
        check_private_key(private_key)?;
        let vapid = VapidSignatureBuilder::from_base64_no_sub(private_key, web_push::URL_SAFE_NO_PAD)
            .map_err(|e| AppError::Configuration(format!("Invalid VAPID private key: {}", e)))?;

        if !(subject.starts_with("mailto:") || subject.starts_with("https://")) {
            return Err(AppError::configuration(
                "VAPID subject must be a mailto: or https:// URI",
            ));
        }

        let public_key = URL_SAFE_NO_PAD.encode(vapid.get_public_key());

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            vapid,
            public_key,
            subject: subject.to_string(),
            ttl,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let private_key = config
            .vapid_private_key
            .as_deref()
            .ok_or_else(|| AppError::configuration("VAPID_PRIVATE_KEY must be set when web push is enabled"))?;
        let subject = config
            .vapid_subject
            .as_deref()
            .ok_or_else(|| AppError::configuration("VAPID_SUBJECT must be set when web push is enabled"))?;

        let adapter = Self::new(
            private_key,
            subject,
            config.web_push_ttl_secs,
            Duration::from_secs(config.delivery_attempt_timeout_secs),
        )?;

        // 配置了公钥时必须与私钥匹配，否则浏览器端订阅会全部失效
        if let Some(configured) = config.vapid_public_key.as_deref() {
            if configured.trim_end_matches('=') != adapter.public_key {
                return Err(AppError::configuration(
                    "VAPID_PUBLIC_KEY does not match VAPID_PRIVATE_KEY",
                ));
            }
        }

        info!("Web push adapter initialised (subject {})", adapter.subject);
        Ok(adapter)
    }

    /// 浏览器订阅时使用的 applicationServerKey
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    fn build_message(&self, subscription: &PushSubscription, payload: &DisplayPayload) -> std::result::Result<WebPushMessage, WebPushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.p256dh.as_str(),
            subscription.auth.as_str(),
        );

        let mut signature = self.vapid.clone().add_sub_info(&info);
        signature.add_claim("sub", self.subject.as_str());
        let signature = signature.build()?;

        let body = serde_json::to_vec(payload).map_err(|_| WebPushError::Unspecified)?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &body);
        builder.set_vapid_signature(signature);
        builder.set_ttl(self.ttl);
        builder.build()
    }

    async fn send(&self, message: WebPushMessage) -> DeliveryOutcome {
        let mut request = self
            .http_client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(payload) = message.payload {
            request = request
                .header(CONTENT_ENCODING, "aes128gcm")
                .header(CONTENT_TYPE, "application/octet-stream");
            for (name, value) in payload.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(payload.content);
        }

        match request.send().await {
            Ok(response) => classify_status(response.status()),
            Err(e) => DeliveryOutcome::transient(format!("network error: {}", e)),
        }
    }
}

/// VAPID 私钥是 base64url 编码的 32 字节 P-256 标量
fn check_private_key(private_key: &str) -> Result<()> {
    let scalar = URL_SAFE_NO_PAD
        .decode(private_key)
        .map_err(|_| AppError::configuration("VAPID private key must be base64url encoded"))?;
    if scalar.len() != 32 {
        return Err(AppError::configuration("VAPID private key must decode to 32 bytes"));
    }
    Ok(())
}

/// 404/410 表示订阅已永久失效，其余非 2xx 视为临时失败
pub fn classify_status(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        DeliveryOutcome::Delivered
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        DeliveryOutcome::permanent(format!("push service responded {}", status))
    } else {
        DeliveryOutcome::transient(format!("push service responded {}", status))
    }
}

/// 订阅自身的密钥或地址不可用时永远不会成功
fn classify_build_error(error: WebPushError) -> DeliveryOutcome {
    match error {
        WebPushError::InvalidCryptoKeys | WebPushError::MissingCryptoKeys | WebPushError::InvalidUri => {
            DeliveryOutcome::permanent(format!("unusable subscription: {}", error))
        }
        other => DeliveryOutcome::transient(format!("failed to build push message: {}", other)),
    }
}

#[async_trait]
impl DeliveryChannel<PushSubscription> for WebPushAdapter {
    fn name(&self) -> &'static str {
        "web_push"
    }

    async fn attempt(&self, subscription: &PushSubscription, payload: &DisplayPayload) -> DeliveryOutcome {
        let message = match self.build_message(subscription, payload) {
            Ok(message) => message,
            Err(e) => {
                let outcome = classify_build_error(e);
                warn!("Web push to subscription {} not sent: {:?}", subscription.id, outcome);
                return outcome;
            }
        };

        let outcome = self.send(message).await;
        match &outcome {
            DeliveryOutcome::Delivered => {
                debug!("Web push delivered to subscription {}", subscription.id)
            }
            DeliveryOutcome::PermanentFailure(reason) => {
                info!("Web push subscription {} is gone: {}", subscription.id, reason)
            }
            DeliveryOutcome::TransientFailure(reason) => {
                warn!("Web push to subscription {} failed: {}", subscription.id, reason)
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use wiremock::{
        matchers::{header, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const VAPID_PRIVATE: &str = "gAcBuTY3chF5F1W8lnEsYca5ofvyM3pzssHoRzIe5X8";
    const VAPID_PUBLIC: &str =
        "BG_bwIuwFYdWNjLWUMLja3DLZdpf3wcjTl4AIvZWJd6VSDU84U_y4it9O38fETTyackR3tY7-1i8QoSwYJEAp0k";
    const P256DH: &str =
        "BKQiEuY0uiXmkGA2yl8WCeagS47O3gcLkbuWD0ihI82DIXXlEgUNTCn5MMMiW4UEDXvVDT-gjkjrSrmqqGKdF-s";
    const AUTH: &str = "rCmbIf8AZTEOnsAQ81L41g";

    fn adapter() -> WebPushAdapter {
        WebPushAdapter::new(VAPID_PRIVATE, "mailto:ops@example.com", 60, Duration::from_secs(5)).unwrap()
    }

    fn subscription(endpoint: String) -> PushSubscription {
        PushSubscription {
            id: "sub-1".to_string(),
            user_id: "bob".to_string(),
            endpoint,
            p256dh: P256DH.to_string(),
            auth: AUTH.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn payload() -> DisplayPayload {
        DisplayPayload {
            title: "New like".to_string(),
            body: "alice liked your post".to_string(),
            tag: "notification-1".to_string(),
            data: Map::new(),
        }
    }

    async fn attempt_with_status(status: u16) -> DeliveryOutcome {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push/abc"))
            .and(header("content-encoding", "aes128gcm"))
            .and(header_exists("authorization"))
            .and(header_exists("ttl"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;

        adapter()
            .attempt(&subscription(format!("{}/push/abc", server.uri())), &payload())
            .await
    }

    #[tokio::test]
    async fn test_created_is_delivered() {
        assert_eq!(attempt_with_status(201).await, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_gone_is_permanent() {
        assert!(attempt_with_status(410).await.is_permanent());
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        assert!(attempt_with_status(404).await.is_permanent());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        assert!(matches!(
            attempt_with_status(500).await,
            DeliveryOutcome::TransientFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        assert!(matches!(
            attempt_with_status(429).await,
            DeliveryOutcome::TransientFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_network_error_is_transient() {
        // 端口 9 上没有服务监听
        let outcome = adapter()
            .attempt(&subscription("http://127.0.0.1:9/push/abc".to_string()), &payload())
            .await;
        assert!(matches!(outcome, DeliveryOutcome::TransientFailure(_)));
    }

    #[test]
    fn test_public_key_derived_from_private_key() {
        assert_eq!(adapter().public_key(), VAPID_PUBLIC);
    }

    #[test]
    fn test_invalid_credentials_fail_at_construction() {
        assert!(matches!(
            WebPushAdapter::new("not-a-key", "mailto:ops@example.com", 60, Duration::from_secs(5)),
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            WebPushAdapter::new(VAPID_PRIVATE, "ops@example.com", 60, Duration::from_secs(5)),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_config_requires_keys_and_matching_public_key() {
        let mut config = Config {
            enable_web_push: true,
            ..Config::default()
        };
        assert!(WebPushAdapter::from_config(&config).is_err());

        config.vapid_private_key = Some(VAPID_PRIVATE.to_string());
        config.vapid_subject = Some("mailto:ops@example.com".to_string());
        config.vapid_public_key = Some(P256DH.to_string());
        assert!(WebPushAdapter::from_config(&config).is_err());

        config.vapid_public_key = Some(VAPID_PUBLIC.to_string());
        assert!(WebPushAdapter::from_config(&config).is_ok());
    }

    #[test]
    fn test_private_key_must_be_a_p256_scalar() {
        assert!(check_private_key(VAPID_PRIVATE).is_ok());
        assert!(check_private_key("c2hvcnQ").is_err());
        assert!(matches!(
            WebPushAdapter::new("c2hvcnQ", "mailto:ops@example.com", 60, Duration::from_secs(5)),
            Err(AppError::Configuration(_))
        ));
        // 带填充的写法同样接受
        let padded = format!("{}=", VAPID_PRIVATE);
        assert_eq!(
            WebPushAdapter::new(&padded, "mailto:ops@example.com", 60, Duration::from_secs(5))
                .unwrap()
                .public_key(),
            VAPID_PUBLIC
        );
    }

    #[test]
    fn test_unbuildable_message_is_transient() {
        assert!(matches!(
            classify_build_error(WebPushError::Unspecified),
            DeliveryOutcome::TransientFailure(_)
        ));
        assert!(classify_build_error(WebPushError::InvalidCryptoKeys).is_permanent());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK).is_delivered());
        assert!(classify_status(StatusCode::GONE).is_permanent());
        assert!(!classify_status(StatusCode::SERVICE_UNAVAILABLE).is_permanent());
        assert!(!classify_status(StatusCode::BAD_REQUEST).is_permanent());
    }
}
