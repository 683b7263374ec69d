// v 库主入口，按需导出模块
// v crate entry: shared config, tracing and HTTP helpers for v-duo services

pub mod comm;
pub use crate::comm::config::*;
pub use crate::comm::tracing::init_tracing;

#[cfg(feature = "web_actix")]
pub mod response;

// 重新导出 tracing 宏 / Re-export tracing macros
pub use tracing::{debug, error, info, trace, warn};

use async_trait::async_trait;

/// 健康状态结构体：用于表示组件当前健康状况
/// Health status struct: represents the current health of a component
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    /// 组件名称 / Component name (e.g. relay, persistence)
    pub component: String,
    /// 是否健康 / Whether healthy
    pub healthy: bool,
    /// 附加消息 / Additional message
    pub message: Option<String>,
    /// 采样时间戳（UTC）/ Sample timestamp (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    pub fn up(component: impl Into<String>, message: Option<String>) -> Self {
        Self {
            component: component.into(),
            healthy: true,
            message,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// 健康检查通用接口 / Generic health check interface
#[async_trait]
pub trait HealthCheck {
    async fn check_health(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysUp;

    #[async_trait]
    impl HealthCheck for AlwaysUp {
        async fn check_health(&self) -> HealthStatus {
            HealthStatus::up("always", Some("ok".into()))
        }
    }

    #[tokio::test]
    async fn health_status_serializes_component() {
        let status = AlwaysUp.check_health().await;
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["component"], "always");
        assert_eq!(json["healthy"], true);
    }
}
