use serde::Serialize;
use std::fmt;

/// 单次投递尝试的结果。通道适配器只返回结果，不因普通投递失败返回错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

impl DeliveryOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryOutcome::TransientFailure(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        DeliveryOutcome::PermanentFailure(reason.into())
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryOutcome::PermanentFailure(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Realtime,
    WebPush,
    MobilePush,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Realtime => "realtime",
            ChannelKind::WebPush => "web_push",
            ChannelKind::MobilePush => "mobile_push",
        };
        f.write_str(name)
    }
}

/// 一次尝试的记录；`recipient_id` 为用户ID（实时通道）或订阅/令牌ID
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub channel: ChannelKind,
    pub recipient_id: String,
    pub outcome: DeliveryOutcome,
    pub pruned: bool,
}

/// 一次派发全部尝试结束后的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    /// 测试推送没有持久化记录，此时为 None
    pub notification_id: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl DeliveryReport {
    pub fn for_channel(&self, channel: ChannelKind) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter().filter(move |a| a.channel == channel)
    }

    pub fn delivered_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.outcome.is_delivered()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.len() - self.delivered_count()
    }

    pub fn pruned_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.pruned).count()
    }
}
