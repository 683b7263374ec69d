use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use v::init_tracing;

use v_duo_relay::config;
use v_duo_relay::server::RelayServer;
use v_duo_relay::service::notifier::{Notifier, WebhookNotifier};
use v_duo_relay::storage::open_gateway;
use v_duo_relay::tasks;

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "v-duo-relay WebSocket & HTTP Server", long_about = None)]
pub struct Args {
    /// 指定配置文件路径（TOML/JSON/YAML自动识别）
    /// Specify config file path (auto-detect TOML/JSON/YAML)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,
}

/// 启动HTTP服务器 / Start HTTP server
async fn start_http_server(server: Arc<RelayServer>, host: String, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("🌐 HTTP Server starting on http://{}", addr);
    info!("📡 Available HTTP endpoints:");
    info!("   GET  /v1/health - Relay health");
    info!("   GET  /v1/health/live - Liveness check");
    info!("   GET  /v1/protocol/schema - Inbound event JSON schema");

    HttpServer::new(move || {
        App::new()
            .wrap(
                actix_web::middleware::DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Headers", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, OPTIONS")),
            )
            .app_data(web::Data::new(server.clone()))
            .configure(v_duo_relay::router::configure)
    })
    .bind(addr)?
    .run()
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 如果提供配置文件路径则使用之，否则加载本服务默认配置
    // Initialize global config with provided file or service default
    let cfg_path = args
        .config
        .unwrap_or_else(|| format!("{}/config/default.toml", env!("CARGO_MANIFEST_DIR")));
    let cm = v::init_global_config_with_file(&cfg_path)?;

    // 初始化日志 / Initialize logging
    init_tracing()?;
    info!("🎯 Starting v-duo-relay (WebSocket + HTTP)...");
    info!("🔧 Loaded config file: {}", cfg_path);
    cm.log_sources_info();

    let cfg = config::load(&cm)?;
    info!(
        "🏠 Room '{}' (grace {}ms), dedup capacity {}",
        cfg.room.id, cfg.room.grace_ms, cfg.limits.dedup_capacity
    );

    let gateway = open_gateway(&cfg.storage.backend, &cfg.storage.path);
    let mut server = RelayServer::new(cfg.clone(), gateway);
    if cfg.notifier.enabled {
        match WebhookNotifier::new(&cfg.notifier) {
            Ok(notifier) => {
                info!(
                    "🔔 Notifier enabled ({} identities registered, secret {})",
                    cfg.notifier.endpoints.len(),
                    if cfg.notifier.secret.is_some() { "configured" } else { "none" }
                );
                server = server.with_notifier(Arc::new(notifier) as Arc<dyn Notifier>);
            }
            Err(e) => warn!("failed to init notifier: {}", e),
        }
    } else {
        info!("🔕 Notifier: Disabled");
    }
    let server = Arc::new(server);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 心跳与保留期清理 / Heartbeat and retention sweep
    tasks::heartbeat::spawn_heartbeat_task(
        server.clone(),
        cfg.server.heartbeat_interval_ms,
        cfg.server.heartbeat_timeout_ms,
        shutdown_rx.clone(),
    );
    tasks::retention::spawn_retention_task(server.clone(), cfg.sweep_interval_ms, shutdown_rx);

    // 启动WebSocket服务器 / Start WebSocket server
    let ws_server = server.clone();
    let ws_host = cfg.server.host.clone();
    let ws_port = cfg.server.ws_port;
    let ws_future = async move {
        if let Err(e) = ws_server.run(ws_host, ws_port).await {
            error!("❌ WebSocket server error: {}", e);
        }
    };

    // 启动HTTP服务器 / Start HTTP server
    let http_future = start_http_server(server.clone(), cfg.server.host.clone(), cfg.server.http_port);

    tokio::select! {
        _ = ws_future => {
            info!("WebSocket server stopped");
        }
        res = http_future => {
            if let Err(e) = res {
                error!("❌ HTTP server error: {}", e);
            }
            info!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Ctrl-C received");
        }
    }

    let _ = shutdown_tx.send(true);
    info!("✅ Server shutdown successfully");
    Ok(())
}
