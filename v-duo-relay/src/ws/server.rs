use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::server::RelayServer;

impl RelayServer {
    /// WS 监听循环；单次 accept 失败不终止服务
    /// WS accept loop; a failed accept does not stop the listener
    pub async fn run(&self, host: String, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 Relay WebSocket listening on ws://{} (room '{}')", addr, self.room_id());

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("set_nodelay for {} failed: {}", peer_addr, e);
            }
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::ws::connection::handle_connection(stream, peer_addr, server).await {
                    error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}
