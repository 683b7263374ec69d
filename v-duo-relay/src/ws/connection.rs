use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::relay::ConnectionState;
use crate::server::{Connection, RelayServer};

/// 处理新连接 / Handle new connection
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: RelayServer,
) -> Result<()> {
    tracing::info!("📨 New connection from: {}", peer_addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = Uuid::new_v4().to_string();

    let handle_clone = handle.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                tracing::error!("Failed to send message to {}: {}", handle_clone, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let closer = Arc::new(Notify::new());
    let connection = Connection {
        handle: handle.clone(),
        addr: peer_addr,
        sender: tx.clone(),
        last_heartbeat: Arc::new(Mutex::new(Instant::now())),
        closer: closer.clone(),
    };
    server.connections.insert(handle.clone(), connection);
    tracing::info!("✅ Client {} connected from {}", handle, peer_addr);

    let mut state = ConnectionState::new(handle.clone(), tx, server.config.limits.dedup_capacity);
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(message) => {
                        server.update_heartbeat(&handle);
                        match message {
                            Message::Text(text) => server.handle_text(&mut state, &text).await,
                            Message::Binary(bytes) => match String::from_utf8(bytes) {
                                Ok(text) => server.handle_text(&mut state, &text).await,
                                Err(_) => tracing::debug!("non-utf8 binary frame from {} ignored", handle),
                            },
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error from {}: {}", handle, e);
                        break;
                    }
                }
            }
            _ = closer.notified() => {
                tracing::info!("⏱️  Closing stale connection {}", handle);
                break;
            }
        }
    }

    server.connections.remove(&handle);
    server.on_disconnect(&handle);
    drop(state);
    // 给关闭帧留出发送机会 / let a queued close frame flush
    if tokio::time::timeout(std::time::Duration::from_millis(500), send_task)
        .await
        .is_err()
    {
        tracing::debug!("send task for {} did not finish in time", handle);
    }
    tracing::info!("👋 Client {} disconnected", handle);
    Ok(())
}
