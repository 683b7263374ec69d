//! 持久化网关 / Persistence gateway
//!
//! 核心逻辑只依赖 [`PersistenceGateway`]；启动时选择 sled 或内存实现。
//! Core logic depends only on [`PersistenceGateway`]; sled or in-memory is picked at startup.

pub mod memory;
pub mod sled_store;
pub mod traits;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::Identity;

pub use memory::{MemoryStore, PendingQueue};
pub use sled_store::SledStore;
pub use traits::PersistenceGateway;

/// 存储错误 / Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// 追加结果 / Append outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Stored,
    Duplicate,
}

/// 已读记录结果 / Result of recording a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// 已读过该消息的身份 / Identities that have read the message so far
    pub readers: Vec<Identity>,
    /// 本次是否推进到 read / Whether this read advanced the status to `read`
    pub advanced: bool,
    pub sender: Identity,
}

impl ReadOutcome {
    pub fn read_by_both(&self) -> bool {
        Identity::ALL.iter().all(|id| self.readers.contains(id))
    }
}

/// 按配置打开存储；sled 打不开时降级到内存 / Open the configured store, degrading to memory when sled fails
pub fn open_gateway(backend: &str, path: &str) -> Arc<dyn PersistenceGateway> {
    match backend {
        "sled" => match SledStore::open(path) {
            Ok(store) => {
                info!("💾 Persistence: sled at {}", path);
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    "⚠️  Persistence unavailable ({}), running in degraded in-memory mode",
                    e
                );
                Arc::new(MemoryStore::new())
            }
        },
        other => {
            if other != "memory" {
                warn!("unknown storage.backend '{}', using memory", other);
            }
            info!("💾 Persistence: in-memory (messages never expire)");
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_sled_path_degrades_to_memory() {
        let blocker = std::env::temp_dir().join(format!("v-duo-relay-{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("db");

        let gateway = open_gateway("sled", &path.to_string_lossy());
        assert!(!gateway.is_durable());
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn backend_names_pick_the_store() {
        assert!(!open_gateway("memory", "").is_durable());
        assert!(!open_gateway("rocks", "").is_durable());
    }
}
