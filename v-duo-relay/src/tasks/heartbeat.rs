use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::Message;

use crate::server::RelayServer;

/// 定时 Ping 并清理超时连接 / Periodic ping plus cleanup of timed-out connections
pub fn spawn_heartbeat_task(
    server: Arc<RelayServer>,
    interval_ms: u64,
    timeout_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        tracing::info!(
            "⏰ Heartbeat every {}ms, timeout {}ms",
            interval_ms,
            timeout_ms
        );
        let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    server.cleanup_timeout_connections(timeout_ms).await;
                    server.ping_connections();
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
        tracing::info!("⏰ Heartbeat task stopped");
    });
}

impl RelayServer {
    /// 向所有连接发 Ping 帧 / Send a Ping frame to every connection
    pub fn ping_connections(&self) {
        for entry in self.connections.iter() {
            let _ = entry.value().sender.send(Message::Ping(Vec::new()));
        }
    }
}
