use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File};
pub use config::FileFormat;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_CONFIG_MANAGER: RwLock<Option<Arc<ConfigManager>>> = RwLock::new(None);
}

/// 环境变量前缀 / Environment variable prefix (`V_SERVER__WS_PORT` -> `server.ws_port`)
pub const ENV_PREFIX: &str = "V";

/// 配置错误类型 / Config error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置项 '{key}' 不存在 / key '{key}' not found")]
    KeyNotFound { key: String },
    #[error("配置项 '{key}' 类型转换失败 / key '{key}' conversion failed: {message}")]
    TypeConversionError { key: String, message: String },
    #[error("配置初始化失败 / config init failed: {message}")]
    InitializationError { message: String },
}

/// 配置数据源信息 / Config source info
#[derive(Debug, Clone)]
pub struct ConfigSourceInfo {
    pub source_type: String,
    pub description: String,
    pub priority: u8,
    pub loaded: bool,
}

/// 配置源类型 / Config source kinds
pub enum ConfigSource {
    /// 文件配置源 / File source
    File {
        path: String,
        format: Option<FileFormat>,
        required: bool,
    },
    /// 环境变量配置源 / Environment source
    Env { prefix: String },
    /// 字符串配置源 / Inline string source
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    fn describe(&self, priority: u8) -> ConfigSourceInfo {
        let (source_type, description) = match self {
            ConfigSource::File { path, required, .. } => (
                "File",
                format!("file {} (required: {})", path, required),
            ),
            ConfigSource::Env { prefix } => ("Environment", format!("env prefix={}_", prefix)),
            ConfigSource::String { .. } => ("String", "inline string".to_string()),
        };
        ConfigSourceInfo {
            source_type: source_type.to_string(),
            description,
            priority,
            loaded: false,
        }
    }

    fn add_to_builder(
        self,
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        match self {
            ConfigSource::File {
                path,
                format,
                required,
            } => {
                let file = match format {
                    Some(format) => File::with_name(&path).format(format),
                    None => File::with_name(&path),
                };
                Ok(builder.add_source(file.required(required)))
            }
            ConfigSource::Env { prefix } => Ok(builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .ignore_empty(true),
            )),
            ConfigSource::String { content, format } => {
                Ok(builder.add_source(File::from_str(&content, format)))
            }
        }
    }
}

/// 配置管理器 / Layered config manager
pub struct ConfigManager {
    config: Config,
    sources_info: Vec<ConfigSourceInfo>,
}

impl ConfigManager {
    /// 仅使用默认配置源 / Default sources only
    pub fn new() -> Result<Self> {
        Self::with_sources(vec![])
    }

    /// 默认配置源 + 额外配置源 / Default sources plus extra ones
    ///
    /// 优先级从低到高 / Priority low to high:
    /// development.toml -> default.toml -> production.toml -> extra sources -> env
    pub fn with_sources(extra: Vec<ConfigSource>) -> Result<Self> {
        let mut sources: Vec<ConfigSource> = ["development", "default", "production"]
            .iter()
            .map(|name| ConfigSource::File {
                path: format!("config/{}.toml", name),
                format: Some(FileFormat::Toml),
                required: false,
            })
            .collect();
        sources.extend(extra);
        sources.push(ConfigSource::Env {
            prefix: ENV_PREFIX.to_string(),
        });
        Self::from_sources(sources)
    }

    /// 只使用给定配置源（测试用）/ Exactly the given sources (used by tests)
    pub fn from_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut sources_info = Vec::new();

        for (idx, source) in sources.into_iter().enumerate() {
            let mut info = source.describe(idx as u8 + 1);
            if let ConfigSource::File { path, required, .. } = &source {
                let exists = std::path::Path::new(path).exists();
                if !exists && *required {
                    return Err(anyhow!("必需的配置文件不存在 / required config missing: {}", path));
                }
                if !exists {
                    sources_info.push(info);
                    continue;
                }
            }
            builder = source.add_to_builder(builder)?;
            info.loaded = true;
            sources_info.push(info);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("构建配置失败 / build config failed: {}", e))?;
        Ok(Self {
            config,
            sources_info,
        })
    }

    /// 获取指定 key 的配置值 / Get value for key
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config
            .get(key)
            .map_err(|e| anyhow!("获取配置 '{}' 失败: {}", key, e))
    }

    /// 获取配置值，不存在时返回默认值 / Get value or default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// 安全获取配置值 / Get value with typed error
    pub fn get_safe<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, ConfigError> {
        self.config.get(key).map_err(|e| match e {
            config::ConfigError::NotFound(_) => ConfigError::KeyNotFound {
                key: key.to_string(),
            },
            other => ConfigError::TypeConversionError {
                key: key.to_string(),
                message: other.to_string(),
            },
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.config.get::<serde_json::Value>(key).is_ok()
    }

    pub fn sources_info(&self) -> &[ConfigSourceInfo] {
        &self.sources_info
    }

    /// 记录配置源加载情况 / Log which sources were loaded
    pub fn log_sources_info(&self) {
        for info in &self.sources_info {
            let status = if info.loaded { "loaded" } else { "skipped" };
            tracing::info!(
                "🔧 config source #{} {} [{}]: {}",
                info.priority,
                info.source_type,
                status,
                info.description
            );
        }
    }
}

/// 获取全局配置管理器实例（单例模式）/ Global config manager singleton
pub fn get_global_config_manager() -> Result<Arc<ConfigManager>> {
    {
        let manager = GLOBAL_CONFIG_MANAGER
            .read()
            .map_err(|e| anyhow!("读取全局配置管理器锁失败: {}", e))?;
        if let Some(ref config_manager) = *manager {
            return Ok(Arc::clone(config_manager));
        }
    }
    let mut manager = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败: {}", e))?;
    match manager.as_ref() {
        Some(existing) => Ok(Arc::clone(existing)),
        None => {
            let config_manager = Arc::new(ConfigManager::new()?);
            *manager = Some(Arc::clone(&config_manager));
            Ok(config_manager)
        }
    }
}

/// 使用指定文件初始化全局配置 / Install global config with an extra required file
pub fn init_global_config_with_file(path: &str) -> Result<Arc<ConfigManager>> {
    let config_manager = Arc::new(ConfigManager::with_sources(vec![ConfigSource::File {
        path: path.to_string(),
        format: None,
        required: true,
    }])?);
    let mut manager = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败: {}", e))?;
    *manager = Some(Arc::clone(&config_manager));
    Ok(config_manager)
}

/// 全局配置获取函数 / Global typed getter
pub fn get_config<T: DeserializeOwned>(key: &str) -> Result<T> {
    get_global_config_manager()?.get(key)
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ConfigManager, ConfigSource};
    use config::FileFormat;

    #[test]
    fn reads_inline_toml() {
        let source = ConfigSource::String {
            content: "[server]\nws_port = 5300".to_string(),
            format: FileFormat::Toml,
        };
        let manager = ConfigManager::from_sources(vec![source]).unwrap();
        assert_eq!(manager.get::<i64>("server.ws_port").unwrap(), 5300);
        assert_eq!(manager.get_or("server.http_port", 8080_i64), 8080);
    }

    #[test]
    fn later_source_overrides_earlier() {
        let base = ConfigSource::String {
            content: "[room]\nid = \"main\"\ngrace_ms = 1000".to_string(),
            format: FileFormat::Toml,
        };
        let overlay = ConfigSource::String {
            content: "[room]\nid = \"lounge\"".to_string(),
            format: FileFormat::Toml,
        };
        let manager = ConfigManager::from_sources(vec![base, overlay]).unwrap();
        assert_eq!(manager.get::<String>("room.id").unwrap(), "lounge");
        assert_eq!(manager.get::<i64>("room.grace_ms").unwrap(), 1000);
    }

    #[test]
    fn env_double_underscore_maps_to_nested_key() {
        std::env::set_var("VDUOCFGTEST_SERVER__WS_PORT", "5400");
        let source = ConfigSource::Env {
            prefix: "VDUOCFGTEST".to_string(),
        };
        let manager = ConfigManager::from_sources(vec![source]).unwrap();
        std::env::remove_var("VDUOCFGTEST_SERVER__WS_PORT");
        assert_eq!(manager.get::<i64>("server.ws_port").unwrap(), 5400);
    }

    #[test]
    fn missing_key_is_typed() {
        let manager = ConfigManager::from_sources(vec![]).unwrap();
        assert!(matches!(
            manager.get_safe::<String>("nope.key"),
            Err(ConfigError::KeyNotFound { .. })
        ));
        assert!(!manager.exists("nope.key"));
    }

    #[test]
    fn required_missing_file_fails() {
        let source = ConfigSource::File {
            path: "does/not/exist.toml".to_string(),
            format: None,
            required: true,
        };
        assert!(ConfigManager::from_sources(vec![source]).is_err());
    }
}
