//! 社交网络通知投递服务：持久化通知记录，并向实时连接、Web Push
//! 与移动推送三个通道扇出。

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
