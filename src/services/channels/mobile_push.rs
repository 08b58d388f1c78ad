use super::DeliveryChannel;
use crate::{
    config::Config,
    error::{AppError, Result},
    models::{delivery::DeliveryOutcome, notification::DisplayPayload, push_subscription::MobilePushToken},
};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// 推送服务单次请求允许的最大消息数
pub const MAX_BATCH_SIZE: usize = 100;

/// 这些票据错误说明令牌本身不再可用
const PERMANENT_TICKET_ERRORS: [&str; 3] = ["DeviceNotRegistered", "InvalidCredentials", "MessageTooBig"];

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a Map<String, Value>,
    sound: &'static str,
    priority: &'static str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<TicketDetails>,
}

#[derive(Debug, Deserialize)]
struct TicketDetails {
    #[serde(default)]
    error: Option<String>,
}

impl PushTicket {
    fn into_outcome(self) -> DeliveryOutcome {
        if self.status == "ok" {
            return DeliveryOutcome::Delivered;
        }

        let code = self.details.and_then(|d| d.error);
        let reason = match (&code, self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message,
            (None, None) => "unknown push ticket error".to_string(),
        };

        match code.as_deref() {
            Some(code) if PERMANENT_TICKET_ERRORS.contains(&code) => DeliveryOutcome::permanent(reason),
            _ => DeliveryOutcome::transient(reason),
        }
    }
}

/// 移动推送适配器，使用 Expo 兼容的批量发送接口
pub struct MobilePushAdapter {
    http_client: Client,
    push_url: String,
    access_token: String,
}

impl MobilePushAdapter {
    pub fn new(push_url: &str, access_token: &str, timeout: Duration) -> Result<Self> {
        if access_token.trim().is_empty() {
            return Err(AppError::configuration("Mobile push access token must not be empty"));
        }
        url::Url::parse(push_url)
            .map_err(|e| AppError::Configuration(format!("Invalid mobile push URL: {}", e)))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            push_url: push_url.to_string(),
            access_token: access_token.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let access_token = config.mobile_push_access_token.as_deref().ok_or_else(|| {
            AppError::configuration("MOBILE_PUSH_ACCESS_TOKEN must be set when mobile push is enabled")
        })?;

        let adapter = Self::new(
            &config.mobile_push_url,
            access_token,
            Duration::from_secs(config.delivery_attempt_timeout_secs),
        )?;
        info!("Mobile push adapter initialised ({})", adapter.push_url);
        Ok(adapter)
    }

    /// 发送一个批次，返回的结果与 `tokens` 一一对应
    async fn send_chunk(&self, tokens: &[MobilePushToken], payload: &DisplayPayload) -> Vec<DeliveryOutcome> {
        let messages: Vec<PushMessage<'_>> = tokens
            .iter()
            .map(|token| PushMessage {
                to: &token.token,
                title: &payload.title,
                body: &payload.body,
                data: &payload.data,
                sound: "default",
                priority: "high",
            })
            .collect();

        let response = match self
            .http_client
            .post(&self.push_url)
            .bearer_auth(&self.access_token)
            .json(&messages)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return whole_batch_failure(tokens.len(), format!("network error: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return whole_batch_failure(tokens.len(), format!("push service responded {}", status));
        }

        let body: PushResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return whole_batch_failure(tokens.len(), format!("malformed push response: {}", e)),
        };

        if body.data.len() != tokens.len() {
            warn!(
                "Push service returned {} ticket(s) for {} message(s)",
                body.data.len(),
                tokens.len()
            );
        }

        // 按位置对应；缺失的票据按临时失败处理
        let mut tickets = body.data.into_iter();
        tokens
            .iter()
            .map(|_| match tickets.next() {
                Some(ticket) => ticket.into_outcome(),
                None => DeliveryOutcome::transient("missing push ticket"),
            })
            .collect()
    }
}

fn whole_batch_failure(count: usize, reason: String) -> Vec<DeliveryOutcome> {
    warn!("Mobile push batch of {} failed: {}", count, reason);
    vec![DeliveryOutcome::transient(reason); count]
}

#[async_trait]
impl DeliveryChannel<MobilePushToken> for MobilePushAdapter {
    fn name(&self) -> &'static str {
        "mobile_push"
    }

    async fn attempt(&self, token: &MobilePushToken, payload: &DisplayPayload) -> DeliveryOutcome {
        self.attempt_batch(std::slice::from_ref(token), payload)
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| DeliveryOutcome::transient("missing push ticket"))
    }

    async fn attempt_batch(&self, tokens: &[MobilePushToken], payload: &DisplayPayload) -> Vec<DeliveryOutcome> {
        if tokens.is_empty() {
            return Vec::new();
        }

        let chunks = tokens.chunks(MAX_BATCH_SIZE).map(|chunk| self.send_chunk(chunk, payload));
        let outcomes: Vec<DeliveryOutcome> = join_all(chunks).await.into_iter().flatten().collect();

        debug!(
            "Mobile push batch: {} token(s), {} delivered",
            tokens.len(),
            outcomes.iter().filter(|o| o.is_delivered()).count()
        );
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, Request, ResponseTemplate,
    };

    fn tokens(count: usize) -> Vec<MobilePushToken> {
        (0..count)
            .map(|i| MobilePushToken {
                id: format!("tok-{}", i),
                user_id: "bob".to_string(),
                token: format!("ExponentPushToken[{}]", i),
                is_active: true,
                created_at: Utc::now(),
            })
            .collect()
    }

    fn payload() -> DisplayPayload {
        DisplayPayload {
            title: "New message".to_string(),
            body: "alice sent you a message".to_string(),
            tag: "notification-1".to_string(),
            data: Map::new(),
        }
    }

    fn adapter(server: &MockServer) -> MobilePushAdapter {
        MobilePushAdapter::new(
            &format!("{}/--/api/v2/push/send", server.uri()),
            "test-access-token",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    /// 对每条消息回一个 ok 票据
    fn echo_ok(request: &Request) -> ResponseTemplate {
        let messages: Vec<Value> = serde_json::from_slice(&request.body).unwrap_or_default();
        let data: Vec<Value> = messages
            .iter()
            .map(|_| json!({ "status": "ok", "id": "ticket" }))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
    }

    #[tokio::test]
    async fn test_batches_are_split_at_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/--/api/v2/push/send"))
            .and(header("authorization", "Bearer test-access-token"))
            .respond_with(echo_ok)
            .expect(3)
            .mount(&server)
            .await;

        let outcomes = adapter(&server).attempt_batch(&tokens(250), &payload()).await;

        assert_eq!(outcomes.len(), 250);
        assert!(outcomes.iter().all(|o| o.is_delivered()));

        let sizes: Vec<usize> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice::<Vec<Value>>(&r.body).unwrap().len())
            .collect();
        assert!(sizes.iter().all(|size| *size <= MAX_BATCH_SIZE));
        assert_eq!(sizes.iter().sum::<usize>(), 250);
    }

    #[tokio::test]
    async fn test_ticket_errors_are_classified_per_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "status": "ok", "id": "a" },
                    {
                        "status": "error",
                        "message": "not a registered push notification recipient",
                        "details": { "error": "DeviceNotRegistered" }
                    },
                    {
                        "status": "error",
                        "message": "rate exceeded",
                        "details": { "error": "MessageRateExceeded" }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let outcomes = adapter(&server).attempt_batch(&tokens(3), &payload()).await;

        assert!(outcomes[0].is_delivered());
        assert!(outcomes[1].is_permanent());
        assert!(matches!(outcomes[2], DeliveryOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn test_short_ticket_array_marks_rest_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "status": "ok", "id": "a" }]
            })))
            .mount(&server)
            .await;

        let outcomes = adapter(&server).attempt_batch(&tokens(3), &payload()).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_delivered());
        assert!(matches!(outcomes[1], DeliveryOutcome::TransientFailure(_)));
        assert!(matches!(outcomes[2], DeliveryOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn test_server_error_fails_whole_batch_transiently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcomes = adapter(&server).attempt_batch(&tokens(2), &payload()).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, DeliveryOutcome::TransientFailure(_))));
    }

    #[tokio::test]
    async fn test_malformed_body_fails_transiently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let outcome = adapter(&server).attempt(&tokens(1)[0], &payload()).await;
        assert!(matches!(outcome, DeliveryOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(echo_ok)
            .expect(0)
            .mount(&server)
            .await;

        assert!(adapter(&server).attempt_batch(&[], &payload()).await.is_empty());
    }

    #[test]
    fn test_missing_access_token_is_configuration_error() {
        assert!(matches!(
            MobilePushAdapter::new(DEFAULT_PUSH_URL, " ", Duration::from_secs(5)),
            Err(AppError::Configuration(_))
        ));

        let config = Config {
            enable_mobile_push: true,
            ..Config::default()
        };
        assert!(MobilePushAdapter::from_config(&config).is_err());
    }
}
