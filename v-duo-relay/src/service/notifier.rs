use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::domain::{now_ms, Identity, MessageKind, StoredMessage};
use crate::registry::RoomSnapshot;
use crate::server::RelayServer;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Relay-Signature";
const PREVIEW_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum NotifierError {
    /// 订阅已失效（404/410）/ Subscription is gone (404/410)
    #[error("endpoint gone: {0}")]
    Gone(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// 推送负载 / Push payload
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub audience: Identity,
    pub title: String,
    pub body: String,
    pub timestamp: i64,
}

/// 通知网关 / Notifier gateway
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 返回成功投递的端点数 / Number of endpoints that accepted the notification
    async fn notify(&self, audience: Identity, title: &str, body: &str) -> Result<usize, NotifierError>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, audience: Identity, _title: &str, _body: &str) -> Result<usize, NotifierError> {
        debug!("🔕 Notifier disabled, skipping push to {}", audience);
        Ok(0)
    }
}

/// HTTP 回调推送 / Webhook push notifier
pub struct WebhookNotifier {
    client: reqwest::Client,
    secret: Option<String>,
    endpoints: RwLock<HashMap<Identity, Vec<String>>>,
}

impl WebhookNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NotifierError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            secret: config.secret.clone(),
            endpoints: RwLock::new(config.endpoints.clone()),
        })
    }

    pub fn endpoints(&self, audience: Identity) -> Vec<String> {
        self.endpoints
            .read()
            .get(&audience)
            .cloned()
            .unwrap_or_default()
    }

    fn prune(&self, audience: Identity, url: &str) {
        if let Some(list) = self.endpoints.write().get_mut(&audience) {
            list.retain(|u| u != url);
        }
    }

    async fn deliver(&self, url: &str, body: &[u8]) -> Result<(), NotifierError> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(body, secret)?);
        }
        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            Err(NotifierError::Gone(url.to_string()))
        } else {
            Err(NotifierError::Transport(format!("status {}", status)))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, audience: Identity, title: &str, body: &str) -> Result<usize, NotifierError> {
        let payload = Notification {
            audience,
            title: title.to_string(),
            body: body.to_string(),
            timestamp: now_ms(),
        };
        let bytes = serde_json::to_vec(&payload).map_err(|e| NotifierError::Transport(e.to_string()))?;
        let mut delivered = 0;
        for url in self.endpoints(audience) {
            match self.deliver(&url, &bytes).await {
                Ok(()) => delivered += 1,
                Err(NotifierError::Gone(url)) => {
                    warn!("🗑️  Pruning stale push endpoint for {}: {}", audience, url);
                    self.prune(audience, &url);
                }
                Err(e) => warn!("❌ Push to {} failed: {}", url, e),
            }
        }
        Ok(delivered)
    }
}

/// HMAC-SHA256 签名 / HMAC-SHA256 signature, `sha256=<hex>`
pub fn sign_payload(body: &[u8], secret: &str) -> Result<String, NotifierError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifierError::Transport(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// 通知正文预览 / Notification body preview
pub fn preview(message: &StoredMessage) -> String {
    match message.kind {
        MessageKind::Text => message.text.chars().take(PREVIEW_LEN).collect(),
        MessageKind::Image => "[image]".to_string(),
        MessageKind::Video => "[video]".to_string(),
        MessageKind::Audio => "[audio]".to_string(),
    }
}

impl RelayServer {
    /// 接收方零连接时异步推送，不阻塞中继 / Push asynchronously when the recipient has no connection, never blocking relay
    pub(crate) fn notify_offline(&self, snapshot: &RoomSnapshot, message: &StoredMessage) {
        let audience = message.receiver;
        let title = snapshot
            .profile_of(message.sender)
            .map(|p| p.name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| message.sender.to_string());
        let body = preview(message);
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match notifier.notify(audience, &title, &body).await {
                Ok(n) if n > 0 => info!("🔔 Pushed offline notice to {} ({} endpoints)", audience, n),
                Ok(_) => {}
                Err(e) => warn!("❌ Offline notice to {} failed: {}", audience, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn signature_is_stable_hex() {
        let a = sign_payload(b"{}", "s3cret").unwrap();
        let b = sign_payload(b"{}", "s3cret").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
        assert_ne!(a, sign_payload(b"{}", "other").unwrap());
    }

    #[test]
    fn media_messages_preview_as_placeholder() {
        let mut m = StoredMessage::tombstone("p", "main", None, 0);
        m.kind = MessageKind::Image;
        assert_eq!(preview(&m), "[image]");
    }

    /// 单次应答的假推送端点 / One-shot fake push endpoint
    async fn fake_endpoint(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let reply = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
                let _ = stream.write_all(reply.as_bytes()).await;
            }
        });
        format!("http://{}/push", addr)
    }

    #[tokio::test]
    async fn gone_endpoints_are_pruned() {
        let gone = fake_endpoint("410 Gone").await;
        let ok = fake_endpoint("200 OK").await;
        let mut cfg = NotifierConfig {
            enabled: true,
            timeout_ms: 2000,
            secret: Some("k".into()),
            ..NotifierConfig::default()
        };
        cfg.endpoints
            .insert(Identity::Friend, vec![gone.clone(), ok.clone()]);
        let notifier = WebhookNotifier::new(&cfg).unwrap();
        let delivered = notifier.notify(Identity::Friend, "Ann", "hi").await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(notifier.endpoints(Identity::Friend), vec![ok]);
    }
}
