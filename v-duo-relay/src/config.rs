use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use v::ConfigManager;

use crate::domain::Identity;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct RoomConfig {
    /// 唯一允许的房间 id / The single accepted room id
    pub id: String,
    pub grace_ms: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: String,
    pub path: String,
}

/// 边界限制 / Boundary limits
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    pub max_id_len: usize,
    pub max_text_len: usize,
    pub max_media_len: usize,
    pub dedup_capacity: usize,
}

#[derive(Clone, Debug, Default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub secret: Option<String>,
    pub endpoints: HashMap<Identity, Vec<String>>,
}

/// 中继配置，启动时读取一次 / Relay configuration, read once at startup
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub room: RoomConfig,
    pub storage: StorageConfig,
    pub sweep_interval_ms: u64,
    pub limits: LimitsConfig,
    pub notifier: NotifierConfig,
}

impl RelayConfig {
    pub fn room_grace(&self) -> Duration {
        Duration::from_millis(self.room.grace_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                ws_port: 5200,
                http_port: 8080,
                heartbeat_interval_ms: 30_000,
                heartbeat_timeout_ms: 75_000,
            },
            room: RoomConfig {
                id: "main".to_string(),
                grace_ms: 60_000,
            },
            storage: StorageConfig {
                backend: "sled".to_string(),
                path: format!("{}/data/v-duo-relay", env!("CARGO_MANIFEST_DIR")),
            },
            sweep_interval_ms: 300_000,
            limits: LimitsConfig {
                max_id_len: 100,
                max_text_len: 10_000,
                max_media_len: 2048,
                dedup_capacity: 1000,
            },
            notifier: NotifierConfig {
                timeout_ms: 3000,
                ..NotifierConfig::default()
            },
        }
    }
}

/// 从配置管理器读取，缺省键取默认值 / Load from the config manager, missing keys fall back to defaults
pub fn load(cm: &ConfigManager) -> Result<RelayConfig> {
    let d = RelayConfig::default();
    let mut endpoints = HashMap::new();
    for identity in Identity::ALL {
        let key = format!("notifier.endpoints.{}", identity);
        let urls: Vec<String> = cm.get_or(&key, Vec::new());
        if !urls.is_empty() {
            endpoints.insert(identity, urls);
        }
    }
    let room_id: String = cm.get_or("room.id", d.room.id.clone());
    if room_id.trim().is_empty() {
        anyhow::bail!("room.id must not be empty");
    }

    Ok(RelayConfig {
        server: ServerConfig {
            host: cm.get_or("server.host", d.server.host),
            ws_port: cm.get_or("server.ws_port", d.server.ws_port as i64) as u16,
            http_port: cm.get_or("server.http_port", d.server.http_port as i64) as u16,
            heartbeat_interval_ms: cm.get_or(
                "server.heartbeat_interval_ms",
                d.server.heartbeat_interval_ms as i64,
            ) as u64,
            heartbeat_timeout_ms: cm.get_or(
                "server.heartbeat_timeout_ms",
                d.server.heartbeat_timeout_ms as i64,
            ) as u64,
        },
        room: RoomConfig {
            id: room_id,
            grace_ms: cm.get_or("room.grace_ms", d.room.grace_ms as i64) as u64,
        },
        storage: StorageConfig {
            backend: cm.get_or("storage.backend", d.storage.backend),
            path: cm.get_or("storage.path", d.storage.path),
        },
        sweep_interval_ms: cm.get_or("retention.sweep_interval_ms", d.sweep_interval_ms as i64)
            as u64,
        limits: LimitsConfig {
            max_id_len: cm.get_or("limits.max_id_len", d.limits.max_id_len as i64) as usize,
            max_text_len: cm.get_or("limits.max_text_len", d.limits.max_text_len as i64) as usize,
            max_media_len: cm.get_or("limits.max_media_len", d.limits.max_media_len as i64)
                as usize,
            dedup_capacity: cm.get_or("dedup.capacity", d.limits.dedup_capacity as i64) as usize,
        },
        notifier: NotifierConfig {
            enabled: cm.get_or("notifier.enabled", false),
            timeout_ms: cm.get_or("notifier.timeout_ms", d.notifier.timeout_ms as i64) as u64,
            secret: cm.get::<String>("notifier.secret").ok(),
            endpoints,
        },
    })
}
