pub mod auth;
pub mod channels;
pub mod database;
pub mod dispatcher;
pub mod factory;
pub mod memory;
pub mod notification;
pub mod registry;
pub mod repository;
pub mod websocket;

// 重新导出常用类型
pub use auth::AuthService;
pub use database::Database;
pub use dispatcher::{DeliveryChannels, DeliveryDispatcher, DispatchHandle};
pub use factory::NotificationFactory;
pub use memory::MemoryStore;
pub use notification::NotificationService;
pub use registry::SubscriptionRegistry;
pub use websocket::WebSocketService;
