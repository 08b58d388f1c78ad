use crate::{
    config::Config,
    models::push_subscription::{MobilePushToken, PushSubscription},
    services::{
        channels::{DeliveryChannel, MobilePushAdapter, RealtimeAdapter, WebPushAdapter},
        repository::{ActorDirectory, MobileTokenStore, NotificationStore, WebSubscriptionStore},
        AuthService, Database, DeliveryChannels, DeliveryDispatcher, MemoryStore, NotificationFactory,
        NotificationService, SubscriptionRegistry, WebSocketService,
    },
};
use std::{sync::Arc, time::Duration};

/// 各持久化边界的具体实现
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationStore>,
    pub web_subscriptions: Arc<dyn WebSubscriptionStore>,
    pub mobile_tokens: Arc<dyn MobileTokenStore>,
    pub actors: Arc<dyn ActorDirectory>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            notifications: store.clone(),
            web_subscriptions: store.clone(),
            mobile_tokens: store.clone(),
            actors: store,
        }
    }

    pub fn surreal(db: Arc<Database>) -> Self {
        Self {
            notifications: db.clone(),
            web_subscriptions: db.clone(),
            mobile_tokens: db.clone(),
            actors: db,
        }
    }
}

/// 应用程序的共享状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 认证服务
    pub auth_service: Arc<AuthService>,

    /// 通知读取
    pub notification_service: NotificationService,

    /// 订阅注册表
    pub registry: SubscriptionRegistry,

    /// 投递派发器
    pub dispatcher: DeliveryDispatcher,

    /// WebSocket 连接与分组
    pub websocket_service: WebSocketService,

    /// Web Push 未启用时为 None
    pub vapid_public_key: Option<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        stores: Stores,
        web_push: Option<WebPushAdapter>,
        mobile_push: Option<MobilePushAdapter>,
    ) -> Self {
        let websocket_service = WebSocketService::new(config.websocket_stale_secs);
        let registry = SubscriptionRegistry::new(stores.web_subscriptions.clone(), stores.mobile_tokens.clone());
        let vapid_public_key = web_push.as_ref().map(|adapter| adapter.public_key().to_string());

        let channels = DeliveryChannels {
            realtime: Arc::new(RealtimeAdapter::new(Arc::new(websocket_service.clone()))),
            web_push: web_push.map(|adapter| Arc::new(adapter) as Arc<dyn DeliveryChannel<PushSubscription>>),
            mobile_push: mobile_push.map(|adapter| Arc::new(adapter) as Arc<dyn DeliveryChannel<MobilePushToken>>),
        };

        let dispatcher = DeliveryDispatcher::new(
            NotificationFactory::new(stores.actors.clone()),
            stores.notifications.clone(),
            registry.clone(),
            channels,
            Duration::from_secs(config.delivery_attempt_timeout_secs),
        );

        Self {
            auth_service: Arc::new(AuthService::new(&config)),
            notification_service: NotificationService::new(stores.notifications),
            registry,
            dispatcher,
            websocket_service,
            vapid_public_key,
            config,
        }
    }
}
