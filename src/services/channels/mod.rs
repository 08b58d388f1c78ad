//! 投递通道适配器。每个适配器只负责一次投递尝试并对结果分类，
//! 普通的投递失败通过 `DeliveryOutcome` 表达，不返回错误。

pub mod mobile_push;
pub mod realtime;
pub mod web_push;

use crate::models::{delivery::DeliveryOutcome, notification::DisplayPayload};
use async_trait::async_trait;

pub use mobile_push::MobilePushAdapter;
pub use realtime::{BroadcastGroup, RealtimeAdapter};
pub use web_push::WebPushAdapter;

#[async_trait]
pub trait DeliveryChannel<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    fn name(&self) -> &'static str;

    async fn attempt(&self, recipient: &R, payload: &DisplayPayload) -> DeliveryOutcome;

    /// 批量尝试，返回结果与 `recipients` 一一对应。
    /// 默认实现并发调用 `attempt`；有批量接口的提供方可以覆盖。
    async fn attempt_batch(&self, recipients: &[R], payload: &DisplayPayload) -> Vec<DeliveryOutcome> {
        futures::future::join_all(
            recipients
                .iter()
                .map(|recipient| self.attempt(recipient, payload)),
        )
        .await
    }
}
