use async_trait::async_trait;
use v::{HealthCheck, HealthStatus};

use crate::server::RelayServer;

// 为中继服务实现统一健康检查接口
// Implement unified HealthCheck for the relay
#[async_trait]
impl HealthCheck for RelayServer {
    /// 连接数、房间数与持久化模式 / Connection count, room count and persistence mode
    async fn check_health(&self) -> HealthStatus {
        let msg = format!(
            "online={} rooms={} durable={}",
            self.registry.connection_count(),
            self.registry.room_count(),
            self.gateway.is_durable()
        );
        HealthStatus::up("duo_relay", Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    #[tokio::test]
    async fn in_memory_relay_reports_not_durable() {
        let server = RelayServer::in_memory(RelayConfig::default());
        let status = server.check_health().await;
        assert!(status.healthy);
        assert_eq!(status.message.as_deref(), Some("online=0 rooms=0 durable=false"));
    }
}
