use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;

use crate::config::RelayConfig;
use crate::registry::SessionRegistry;
use crate::service::calls::CallRelay;
use crate::service::notifier::{NoopNotifier, Notifier};
use crate::storage::{MemoryStore, PersistenceGateway};

/// 客户端连接信息 / Client connection information
#[derive(Clone)]
pub struct Connection {
    pub handle: String,                         // 连接句柄 / Connection handle
    pub addr: SocketAddr,                       // 客户端地址 / Client address
    pub sender: mpsc::UnboundedSender<Message>, // 消息发送器 / Message sender
    pub last_heartbeat: Arc<Mutex<Instant>>,    // 最后心跳时间 / Last heartbeat time
    pub closer: Arc<Notify>,                    // 通知读循环退出 / Wakes the read loop to exit
}

/// 服务端全局状态 / Server global state
///
/// 所有字段都是 Arc，克隆即共享 / every field is an Arc, clones share state
#[derive(Clone)]
pub struct RelayServer {
    pub config: Arc<RelayConfig>,                      // 中继配置 / Relay configuration
    pub connections: Arc<DashMap<String, Connection>>, // 传输层连接 / Transport connections
    pub registry: Arc<SessionRegistry>,                // 会话注册表 / Session registry
    pub gateway: Arc<dyn PersistenceGateway>,          // 持久化网关 / Persistence gateway
    pub notifier: Arc<dyn Notifier>,                   // 离线通知 / Offline notifier
    pub calls: Arc<CallRelay>,                         // 通话信令状态 / Call signaling state
    pub(crate) pending_syncs: Arc<DashMap<(String, String), crate::domain::Identity>>, // (room, device) -> identity
}

impl RelayServer {
    /// 构建服务器实例 / Build a server instance
    pub fn new(config: RelayConfig, gateway: Arc<dyn PersistenceGateway>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.room_grace()));
        Self {
            config: Arc::new(config),
            connections: Arc::new(DashMap::new()),
            registry,
            gateway,
            notifier: Arc::new(NoopNotifier),
            calls: Arc::new(CallRelay::new()),
            pending_syncs: Arc::new(DashMap::new()),
        }
    }

    /// 内存存储的默认实例 / Default instance over the in-memory store
    pub fn in_memory(config: RelayConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// 配置离线通知 / Configure the offline notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn room_id(&self) -> &str {
        &self.config.room.id
    }
}
