use std::time::Instant;

use anyhow::Result;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use crate::server::RelayServer;

impl RelayServer {
    /// 更新客户端心跳 / Update client heartbeat
    pub fn update_heartbeat(&self, handle: &str) {
        if let Some(connection) = self.connections.get(handle) {
            *connection.last_heartbeat.lock() = Instant::now();
        }
    }

    /// 发送关闭帧 / Send a close frame
    pub fn send_close_message(&self, handle: &str, reason: &'static str) -> Result<()> {
        if let Some(connection) = self.connections.get(handle) {
            connection
                .sender
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: std::borrow::Cow::Borrowed(reason),
                })))
                .map_err(|e| anyhow::anyhow!("Failed to send close message: {}", e))?;
            debug!("🔒 Sent close message to client {}", handle);
            Ok(())
        } else {
            Err(anyhow::anyhow!("Client {} not found for close message", handle))
        }
    }

    /// 清理超时连接 / Clean up timed-out connections
    pub async fn cleanup_timeout_connections(&self, timeout_ms: u64) {
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| entry.value().last_heartbeat.lock().elapsed().as_millis() > timeout_ms as u128)
            .map(|entry| entry.key().clone())
            .collect();

        for handle in stale {
            // 主动发送关闭消息 / Send close message proactively
            if let Err(e) = self.send_close_message(&handle, "Connection timeout") {
                error!("Failed to send close message to {}: {}", handle, e);
            }
            if let Some((_, connection)) = self.connections.remove(&handle) {
                connection.closer.notify_one();
            }
            info!("🧹 Cleaned up timeout connection: {}", handle);
        }
    }
}
