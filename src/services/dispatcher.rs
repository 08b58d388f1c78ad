use crate::{
    error::{AppError, Result},
    models::{
        delivery::{AttemptRecord, ChannelKind, DeliveryOutcome, DeliveryReport},
        notification::{DisplayPayload, NotificationType},
        push_subscription::{MobilePushToken, PushSubscription},
    },
    services::{
        channels::DeliveryChannel, factory::NotificationFactory, registry::SubscriptionRegistry,
        repository::NotificationStore,
    },
};
use futures::future::join_all;
use serde_json::{json, Map};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// 派发器持有的通道；未启用的推送通道为 `None`，不产生任何尝试
#[derive(Clone)]
pub struct DeliveryChannels {
    pub realtime: Arc<dyn DeliveryChannel<String>>,
    pub web_push: Option<Arc<dyn DeliveryChannel<PushSubscription>>>,
    pub mobile_push: Option<Arc<dyn DeliveryChannel<MobilePushToken>>>,
}

/// 投递派发器。
///
/// 一次派发：构建 → 持久化 → 扇出 → 全部结束。调用方只等待持久化，
/// 扇出在后台任务中进行，永久失败的订阅会被停用，临时失败不重试。
#[derive(Clone)]
pub struct DeliveryDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    factory: NotificationFactory,
    notifications: Arc<dyn NotificationStore>,
    registry: SubscriptionRegistry,
    channels: DeliveryChannels,
    attempt_timeout: Duration,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// 一次扇出的句柄，`settled()` 在全部尝试结束后给出报告
#[derive(Debug)]
pub struct DispatchHandle {
    notification_id: Option<String>,
    task: JoinHandle<DeliveryReport>,
}

impl DispatchHandle {
    pub fn notification_id(&self) -> Option<&str> {
        self.notification_id.as_deref()
    }

    pub async fn settled(self) -> DeliveryReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Fan-out task failed: {}", e);
                DeliveryReport {
                    notification_id: self.notification_id,
                    attempts: Vec::new(),
                }
            }
        }
    }
}

/// 扇出任务存活期间计数，归零时唤醒 `settle()`
struct InFlightGuard {
    inner: Arc<DispatcherInner>,
}

impl InFlightGuard {
    fn acquire(inner: &Arc<DispatcherInner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: inner.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl DeliveryDispatcher {
    pub fn new(
        factory: NotificationFactory,
        notifications: Arc<dyn NotificationStore>,
        registry: SubscriptionRegistry,
        channels: DeliveryChannels,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                factory,
                notifications,
                registry,
                channels,
                attempt_timeout,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// 创建并持久化通知后立即返回通知ID，投递在后台完成
    pub async fn dispatch(
        &self,
        target_user_id: &str,
        actor_id: &str,
        notification_type: NotificationType,
        status_id: Option<i64>,
        message_id: Option<i64>,
    ) -> Result<String> {
        let handle = self
            .dispatch_tracked(target_user_id, actor_id, notification_type, status_id, message_id)
            .await?;
        Ok(handle.notification_id.unwrap_or_default())
    }

    pub async fn dispatch_tracked(
        &self,
        target_user_id: &str,
        actor_id: &str,
        notification_type: NotificationType,
        status_id: Option<i64>,
        message_id: Option<i64>,
    ) -> Result<DispatchHandle> {
        let (notification, payload) = self
            .inner
            .factory
            .build(target_user_id, actor_id, notification_type, status_id, message_id)
            .await?;

        // 任何投递尝试之前记录必须已经落库
        self.inner.notifications.insert_notification(&notification).await?;

        debug!(
            "Persisted {} notification {} for user {}",
            notification.notification_type, notification.id, notification.target_user_id
        );

        Ok(self.spawn_fan_out(notification.target_user_id, payload, Some(notification.id)))
    }

    /// 向用户的全部通道发送固定的测试内容，不写入通知记录
    pub async fn send_test(&self, user_id: &str) -> Result<DispatchHandle> {
        if !self.inner.registry.has_active_subscriptions(user_id).await? {
            return Err(AppError::validation("no active push subscriptions"));
        }

        info!("Sending test notification to user {}", user_id);
        Ok(self.spawn_fan_out(user_id.to_string(), test_payload(), None))
    }

    /// 等待本派发器当前所有扇出结束
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    fn spawn_fan_out(
        &self,
        user_id: String,
        payload: DisplayPayload,
        notification_id: Option<String>,
    ) -> DispatchHandle {
        let guard = InFlightGuard::acquire(&self.inner);
        let inner = self.inner.clone();
        let id = notification_id.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.fan_out(user_id, Arc::new(payload), id).await
        });

        DispatchHandle {
            notification_id,
            task,
        }
    }
}

impl DispatcherInner {
    async fn fan_out(
        &self,
        user_id: String,
        payload: Arc<DisplayPayload>,
        notification_id: Option<String>,
    ) -> DeliveryReport {
        let web_subscriptions = match &self.channels.web_push {
            Some(_) => self
                .registry
                .list_active_web(&user_id)
                .await
                .unwrap_or_else(|e| {
                    warn!("Failed to list web subscriptions for user {}: {}", user_id, e);
                    Vec::new()
                }),
            None => Vec::new(),
        };
        let mobile_tokens = match &self.channels.mobile_push {
            Some(_) => self
                .registry
                .list_active_mobile(&user_id)
                .await
                .unwrap_or_else(|e| {
                    warn!("Failed to list mobile tokens for user {}: {}", user_id, e);
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let realtime = self.spawn_realtime(&user_id, &payload);
        let web = self.spawn_web(web_subscriptions, &payload);
        let mobile = self.spawn_mobile(mobile_tokens, &payload);

        let (realtime, web, mobile) = tokio::join!(realtime, join_all(web), mobile);

        let mut attempts = Vec::with_capacity(1 + web.len() + mobile.len());
        attempts.push(realtime);
        attempts.extend(web);
        attempts.extend(mobile);

        let report = DeliveryReport {
            notification_id,
            attempts,
        };
        debug!(
            "Fan-out for user {} settled: {} attempt(s), {} delivered, {} failed, {} pruned",
            user_id,
            report.attempts.len(),
            report.delivered_count(),
            report.failed_count(),
            report.pruned_count()
        );
        report
    }

    async fn spawn_realtime(&self, user_id: &str, payload: &Arc<DisplayPayload>) -> AttemptRecord {
        let channel = self.channels.realtime.clone();
        let recipient = user_id.to_string();
        let payload = payload.clone();

        let task = spawn_bounded(
            self.attempt_timeout,
            async move { channel.attempt(&recipient, &payload).await },
            || DeliveryOutcome::transient("timed out"),
        );

        AttemptRecord {
            channel: ChannelKind::Realtime,
            recipient_id: user_id.to_string(),
            outcome: join_outcome(task.await),
            pruned: false,
        }
    }

    fn spawn_web(
        &self,
        subscriptions: Vec<PushSubscription>,
        payload: &Arc<DisplayPayload>,
    ) -> Vec<impl Future<Output = AttemptRecord>> {
        let channel = match &self.channels.web_push {
            Some(channel) => channel.clone(),
            None => return Vec::new(),
        };

        subscriptions
            .into_iter()
            .map(|subscription| {
                let channel = channel.clone();
                let payload = payload.clone();
                let registry = self.registry.clone();
                let recipient_id = subscription.id.clone();
                let timeout = self.attempt_timeout;

                let task = tokio::spawn(async move {
                    let outcome = bounded(timeout, channel.attempt(&subscription, &payload), || {
                        DeliveryOutcome::transient("timed out")
                    })
                    .await;
                    let pruned = prune_if_permanent(&registry, ChannelKind::WebPush, &subscription.id, &outcome).await;
                    AttemptRecord {
                        channel: ChannelKind::WebPush,
                        recipient_id: subscription.id,
                        outcome,
                        pruned,
                    }
                });

                async move {
                    task.await.unwrap_or_else(|e| {
                        error!("Web push attempt for subscription {} panicked: {}", recipient_id, e);
                        AttemptRecord {
                            channel: ChannelKind::WebPush,
                            recipient_id,
                            outcome: DeliveryOutcome::transient("delivery task panicked"),
                            pruned: false,
                        }
                    })
                }
            })
            .collect()
    }

    /// 移动端按批提交，结果按位置对应回各个令牌
    async fn spawn_mobile(&self, tokens: Vec<MobilePushToken>, payload: &Arc<DisplayPayload>) -> Vec<AttemptRecord> {
        let channel = match &self.channels.mobile_push {
            Some(channel) if !tokens.is_empty() => channel.clone(),
            _ => return Vec::new(),
        };

        let token_ids: Vec<String> = tokens.iter().map(|t| t.id.clone()).collect();
        let payload = payload.clone();
        let registry = self.registry.clone();
        let timeout = self.attempt_timeout;

        let task = tokio::spawn(async move {
            let count = tokens.len();
            let outcomes = bounded(timeout, channel.attempt_batch(&tokens, &payload), move || {
                vec![DeliveryOutcome::transient("timed out"); count]
            })
            .await;

            let records = tokens.iter().enumerate().map(|(index, token)| {
                let outcome = outcomes
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| DeliveryOutcome::transient("missing batch result"));
                let registry = &registry;
                async move {
                    let pruned = prune_if_permanent(registry, ChannelKind::MobilePush, &token.id, &outcome).await;
                    AttemptRecord {
                        channel: ChannelKind::MobilePush,
                        recipient_id: token.id.clone(),
                        outcome,
                        pruned,
                    }
                }
            });
            join_all(records).await
        });

        match task.await {
            Ok(records) => records,
            Err(e) => {
                error!("Mobile push batch panicked: {}", e);
                token_ids
                    .into_iter()
                    .map(|recipient_id| AttemptRecord {
                        channel: ChannelKind::MobilePush,
                        recipient_id,
                        outcome: DeliveryOutcome::transient("delivery task panicked"),
                        pruned: false,
                    })
                    .collect()
            }
        }
    }
}

async fn bounded<T, F>(timeout: Duration, attempt: F, on_timeout: impl FnOnce() -> T) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(value) => value,
        Err(_) => on_timeout(),
    }
}

fn spawn_bounded<T, F>(
    timeout: Duration,
    attempt: F,
    on_timeout: impl FnOnce() -> T + Send + 'static,
) -> JoinHandle<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    tokio::spawn(bounded(timeout, attempt, on_timeout))
}

fn join_outcome(result: std::result::Result<DeliveryOutcome, tokio::task::JoinError>) -> DeliveryOutcome {
    result.unwrap_or_else(|e| {
        error!("Delivery attempt panicked: {}", e);
        DeliveryOutcome::transient("delivery task panicked")
    })
}

/// 永久失败时停用对应订阅，返回是否成功停用
async fn prune_if_permanent(
    registry: &SubscriptionRegistry,
    channel: ChannelKind,
    recipient_id: &str,
    outcome: &DeliveryOutcome,
) -> bool {
    if !outcome.is_permanent() {
        return false;
    }

    let result = match channel {
        ChannelKind::WebPush => registry.deactivate_web(recipient_id).await,
        ChannelKind::MobilePush => registry.deactivate_mobile(recipient_id).await,
        ChannelKind::Realtime => return false,
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to deactivate {} recipient {}: {}", channel, recipient_id, e);
            false
        }
    }
}

fn test_payload() -> DisplayPayload {
    let mut data = Map::new();
    data.insert("type".to_string(), json!("test"));

    DisplayPayload {
        title: "Test notification".to_string(),
        body: "Push notifications are working".to_string(),
        tag: "test-notification".to_string(),
        data,
    }
}
