//! 客户端对账库 / Client-side reconciliation library
//!
//! 本地消息集合并规则与受监督的重连循环 / local merge rules plus a supervised reconnect loop

pub mod reconnect;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

use crate::domain::{ClientEvent, Profile, ServerEvent};

pub use reconnect::{run_supervised, ReconnectPolicy, SupervisorExit};
pub use store::LocalMessageStore;

/// 中继客户端 / Relay client
pub struct RelayClient {
    url: String,
    join: ClientEvent,
    device_id: String,
    policy: ReconnectPolicy,
    store: Arc<Mutex<LocalMessageStore>>,
}

impl RelayClient {
    pub fn new(url: impl Into<String>, room_id: &str, identity: &str, device_id: &str, profile: Profile) -> Self {
        Self {
            url: url.into(),
            join: ClientEvent::Join {
                room_id: room_id.to_string(),
                identity: identity.to_string(),
                device_id: device_id.to_string(),
                profile,
            },
            device_id: device_id.to_string(),
            policy: ReconnectPolicy::default(),
            store: Arc::new(Mutex::new(LocalMessageStore::new())),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> Arc<Mutex<LocalMessageStore>> {
        self.store.clone()
    }

    /// 运行直到 `shutdown` 变为 true / Run until `shutdown` flips to true
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> SupervisorExit {
        run_supervised(self.policy, shutdown, |attempt| self.session(attempt)).await
    }

    async fn session(&self, attempt: u32) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!("🔌 Connected to {} (attempt {})", self.url, attempt);
        let (mut write, mut read) = ws.split();
        write
            .send(Message::Text(serde_json::to_string(&self.join)?))
            .await?;

        while let Some(frame) = read.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let event: ServerEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    debug!("unparsed server frame: {}", e);
                    continue;
                }
            };
            match &event {
                ServerEvent::SyncRequest { target_device_id } if *target_device_id != self.device_id => {
                    let reply = self.store.lock().sync_response(target_device_id);
                    write.send(Message::Text(serde_json::to_string(&reply)?)).await?;
                }
                _ => self.store.lock().apply_event(&event),
            }
        }
        Ok(())
    }
}
