pub mod delivery;
pub mod notification;
pub mod push_subscription;
pub mod response;
pub mod user;
pub mod websocket;
