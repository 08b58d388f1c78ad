use crate::{
    error::{AppError, Result},
    models::websocket::*,
    services::channels::BroadcastGroup,
};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{
    sink::{Sink, SinkExt},
    stream::StreamExt,
};
use parking_lot::RwLock;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// WebSocket连接管理器，维护连接与 `user_{id}` 分组
#[derive(Clone)]
pub struct WebSocketService {
    // 连接管理
    connections: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    // 分组到连接的映射
    groups: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    stale_after: chrono::Duration,
}

/// 连接信息
#[derive(Debug, Clone)]
struct ConnectionInfo {
    user_id: String,
    tx: mpsc::UnboundedSender<WebSocketMessage>,
    connected_at: DateTime<Utc>,
    last_ping_at: DateTime<Utc>,
    groups: HashSet<String>,
}

impl WebSocketService {
    pub fn new(stale_after_secs: i64) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            groups: Arc::new(RwLock::new(HashMap::new())),
            stale_after: chrono::Duration::seconds(stale_after_secs),
        }
    }

    /// 启动过期连接清理任务
    pub fn spawn_cleanup(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                service.cleanup_stale_connections();
            }
        });
    }

    /// 处理新的WebSocket连接
    pub async fn handle_connection(&self, websocket: WebSocket, user_id: String) {
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4());
        info!("New WebSocket connection: {} for user: {}", connection_id, user_id);

        let (mut ws_tx, mut ws_rx) = websocket.split();
        let (tx, rx) = mpsc::unbounded_channel();

        self.register_connection(&connection_id, &user_id, tx.clone());

        // 发送连接确认消息
        let connect_msg = WebSocketMessage::new(
            WebSocketMessageType::Connect,
            json!({
                "connection_id": connection_id,
                "user_id": user_id,
                "group": user_group(&user_id),
            }),
        );
        if tx.send(connect_msg).is_err() {
            error!("Failed to send connect message to {}", connection_id);
        }
        // 注册表持有唯一的发送端，连接被移除后队列随之关闭
        drop(tx);

        // 处理发送消息任务
        let connection_id_clone = connection_id.clone();
        let mut send_task = tokio::spawn(async move {
            forward_messages(rx, ws_tx, &connection_id_clone).await;
            debug!("Send task ended for connection: {}", connection_id_clone);
        });

        // 处理接收消息任务
        let service = self.clone();
        let connection_id_clone = connection_id.clone();
        let mut receive_task = tokio::spawn(async move {
            while let Some(msg_result) = ws_rx.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = service.handle_incoming_message(&connection_id_clone, &text) {
                            warn!("Rejected message from {}: {}", connection_id_clone, e);
                            let _ = service.send_to_connection(
                                &connection_id_clone,
                                WebSocketMessage::error("BAD_REQUEST", &e.to_string()),
                            );
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        service.touch(&connection_id_clone);
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring binary message of {} bytes", data.len());
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket connection closed: {}", connection_id_clone);
                        break;
                    }
                    Err(e) => {
                        warn!("WebSocket error for connection {}: {}", connection_id_clone, e);
                        break;
                    }
                }
            }
        });

        // 任一方向结束即关闭连接
        tokio::select! {
            _ = &mut send_task => receive_task.abort(),
            _ = &mut receive_task => send_task.abort(),
        }

        self.unregister_connection(&connection_id);
    }

    fn register_connection(&self, connection_id: &str, user_id: &str, tx: mpsc::UnboundedSender<WebSocketMessage>) {
        let group = user_group(user_id);
        let now = Utc::now();

        self.connections.write().insert(
            connection_id.to_string(),
            ConnectionInfo {
                user_id: user_id.to_string(),
                tx,
                connected_at: now,
                last_ping_at: now,
                groups: HashSet::from([group.clone()]),
            },
        );

        self.groups
            .write()
            .entry(group)
            .or_insert_with(HashSet::new)
            .insert(connection_id.to_string());

        debug!("Registered connection: {} for user: {}", connection_id, user_id);
    }

    fn unregister_connection(&self, connection_id: &str) {
        let removed = self.connections.write().remove(connection_id);
        let Some(connection) = removed else {
            return;
        };

        let mut groups = self.groups.write();
        for group in &connection.groups {
            if let Some(members) = groups.get_mut(group) {
                members.remove(connection_id);
                if members.is_empty() {
                    groups.remove(group);
                }
            }
        }

        info!(
            "Unregistered connection: {} for user: {} (open {}s)",
            connection_id,
            connection.user_id,
            (Utc::now() - connection.connected_at).num_seconds()
        );
    }

    fn handle_incoming_message(&self, connection_id: &str, text: &str) -> Result<()> {
        let message: WebSocketMessage = serde_json::from_str(text)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

        self.touch(connection_id);

        match message.message_type {
            WebSocketMessageType::Ping => {
                let client_timestamp = message
                    .data
                    .get("timestamp")
                    .and_then(|ts| ts.as_str())
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                self.send_to_connection(connection_id, WebSocketMessage::pong(connection_id, client_timestamp))
            }
            other => {
                debug!("Ignoring client message of type {:?}", other);
                Ok(())
            }
        }
    }

    pub fn send_to_connection(&self, connection_id: &str, message: WebSocketMessage) -> Result<()> {
        let tx = self
            .connections
            .read()
            .get(connection_id)
            .map(|conn| conn.tx.clone())
            .ok_or_else(|| AppError::NotFound(format!("Connection not found: {}", connection_id)))?;

        tx.send(message)
            .map_err(|_| AppError::Internal("Connection send failed".to_string()))
    }

    fn touch(&self, connection_id: &str) {
        if let Some(conn) = self.connections.write().get_mut(connection_id) {
            conn.last_ping_at = Utc::now();
        }
    }

    /// 清理过期连接
    fn cleanup_stale_connections(&self) {
        let threshold = Utc::now() - self.stale_after;
        let stale: Vec<String> = self
            .connections
            .read()
            .iter()
            .filter(|(_, conn)| conn.last_ping_at < threshold)
            .map(|(id, _)| id.clone())
            .collect();

        for connection_id in stale {
            warn!("Cleaning up stale connection: {}", connection_id);
            self.unregister_connection(&connection_id);
        }
    }

    pub fn get_stats(&self) -> WebSocketStats {
        let connections = self.connections.read();
        let active_users = connections
            .values()
            .map(|conn| conn.user_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        WebSocketStats {
            total_connections: connections.len(),
            active_users,
            groups: self.groups.read().len(),
        }
    }
}

/// 将队列中的消息写入套接字；队列关闭（连接已被注销）时向客户端发送 Close
async fn forward_messages<S>(mut rx: mpsc::UnboundedReceiver<WebSocketMessage>, mut sink: S, connection_id: &str)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = rx.recv().await {
        match serde_json::to_string(&message) {
            Ok(json_str) => {
                if let Err(e) = sink.send(Message::Text(json_str)).await {
                    debug!("Failed to send WebSocket message: {}", e);
                    return;
                }
            }
            Err(e) => error!("Failed to serialize message: {}", e),
        }
    }

    info!("Closing connection {} after it was unregistered", connection_id);
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("Failed to send close frame to {}: {}", connection_id, e);
    }
}

#[async_trait]
impl BroadcastGroup for WebSocketService {
    async fn broadcast_to_group(&self, group: &str, message: WebSocketMessage) -> Result<usize> {
        let members: Vec<mpsc::UnboundedSender<WebSocketMessage>> = {
            let groups = self.groups.read();
            let connections = self.connections.read();
            groups
                .get(group)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| connections.get(id).map(|conn| conn.tx.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let delivered = members
            .into_iter()
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count();

        debug!("Broadcast to group {} reached {} connection(s)", group, delivered);
        Ok(delivered)
    }
}
