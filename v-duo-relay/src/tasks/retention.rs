use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::domain::now_ms;
use crate::server::RelayServer;

/// 启动保留期清理；首个 tick 立即触发，补上停机期间过期的消息
/// Start the retention sweep; the first tick fires at once to catch messages that expired while down
pub fn spawn_retention_task(
    server: Arc<RelayServer>,
    interval_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !server.gateway.is_durable() {
        tracing::warn!("🕒 Persistence is in-memory, retention sweep disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        tracing::info!("🕒 Retention sweep every {}ms", interval_ms);
        let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = server.sweep_expired(now_ms()).await {
                        tracing::error!("❌ Retention sweep failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    }))
}
