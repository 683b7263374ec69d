use anyhow::Result;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

use crate::comm::config::get_global_config_manager;

/// 本地时间，精确到毫秒 / Local wall-clock time with millisecond precision
struct LocalMillis;

impl fmt::time::FormatTime for LocalMillis {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// 日志设置 / Logging settings read from the `[logging]` table
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub show_target: bool,
    /// 附加指令，如 `sled=warn` / extra directives such as `sled=warn`
    pub directives: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
            directives: vec!["sled=warn".to_string()],
        }
    }
}

impl LogSettings {
    fn from_global() -> Self {
        let defaults = Self::default();
        let Ok(mgr) = get_global_config_manager() else {
            return defaults;
        };
        Self {
            level: mgr.get_or("logging.level", defaults.level),
            show_target: mgr.get_or("logging.show_target", defaults.show_target),
            directives: mgr.get_or("logging.directives", defaults.directives),
        }
    }

    /// `RUST_LOG` 优先于配置 / `RUST_LOG` wins over the config file
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| {
                let mut spec = self.level.clone();
                for d in &self.directives {
                    spec.push(',');
                    spec.push_str(d);
                }
                EnvFilter::try_new(spec)
            })
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// 初始化全局日志；重复调用无副作用 / Install the global subscriber, repeat calls are no-ops
pub fn init_tracing() -> Result<()> {
    let settings = LogSettings::from_global();
    LogTracer::init().ok();
    fmt::SubscriberBuilder::default()
        .with_env_filter(settings.filter())
        .with_timer(LocalMillis)
        .compact()
        .with_target(settings.show_target)
        .try_init()
        .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        assert!(init_tracing().is_ok());
        assert!(init_tracing().is_ok());
    }

    #[test]
    fn directives_extend_level() {
        let settings = LogSettings {
            level: "debug".into(),
            show_target: true,
            directives: vec!["sled=error".into()],
        };
        std::env::remove_var("RUST_LOG");
        assert!(settings.filter().to_string().contains("sled=error"));
    }
}
