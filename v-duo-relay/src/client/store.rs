use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::domain::{ClientEvent, DeliveryStatus, ServerEvent, WireMessage};

/// 客户端本地消息集 / Client-side local message set
///
/// 按 id 并集合并、按时间排序；重复应用同一负载结果不变。
/// Union by id, ordered by timestamp; applying the same payload twice leaves it unchanged.
#[derive(Debug, Default, Clone)]
pub struct LocalMessageStore {
    messages: HashMap<String, WireMessage>,
    tombstones: HashSet<String>,
}

impl LocalMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一批消息，返回新增条数 / Merge a batch, returning how many ids were new
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = WireMessage>) -> usize {
        let mut added = 0;
        for message in incoming {
            if self.tombstones.contains(&message.id) {
                continue;
            }
            match self.messages.get_mut(&message.id) {
                Some(existing) => {
                    if message.status > existing.status {
                        existing.status = message.status;
                    }
                    if existing.expires_at.is_none() {
                        existing.expires_at = message.expires_at;
                    }
                }
                None => {
                    self.messages.insert(message.id.clone(), message);
                    added += 1;
                }
            }
        }
        added
    }

    /// 只前进的状态更新 / Forward-only status update
    pub fn apply_status(&mut self, ids: &[String], status: DeliveryStatus) {
        for id in ids {
            if let Some(m) = self.messages.get_mut(id) {
                if let Some(next) = m.status.advance(status) {
                    m.status = next;
                }
            }
        }
    }

    pub fn apply_deleted(&mut self, id: &str) {
        self.messages.remove(id);
        self.tombstones.insert(id.to_string());
    }

    pub fn apply_wipe(&mut self) {
        let ids: Vec<String> = self.messages.keys().cloned().collect();
        for id in ids {
            self.apply_deleted(&id);
        }
    }

    /// 应用一条服务端事件 / Apply one server event
    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ChatMessage { message } => {
                self.merge([message.clone()]);
            }
            ServerEvent::SyncMessages { messages } => {
                self.merge(messages.iter().cloned());
            }
            ServerEvent::SyncResponse { messages, .. } => {
                let parsed = messages
                    .iter()
                    .filter_map(|v| serde_json::from_value::<WireMessage>(v.clone()).ok());
                self.merge(parsed);
            }
            ServerEvent::MessageStatus { ids, status } => self.apply_status(ids, *status),
            ServerEvent::MessageDeleted { id } => self.apply_deleted(id),
            ServerEvent::EmergencyWipe { .. } => self.apply_wipe(),
            other => debug!("local store ignores {:?}", other),
        }
    }

    /// 回应兄弟设备的同步请求 / Answer a sibling's sync request with the local set
    pub fn sync_response(&self, target_device_id: &str) -> ClientEvent {
        ClientEvent::SyncResponse {
            target_device_id: target_device_id.to_string(),
            messages: self
                .messages()
                .into_iter()
                .filter_map(|m| serde_json::to_value(m).ok())
                .collect::<Vec<Value>>(),
        }
    }

    /// 按 (时间, id) 升序 / Ascending by (timestamp, id)
    pub fn messages(&self) -> Vec<WireMessage> {
        let mut list: Vec<WireMessage> = self.messages.values().cloned().collect();
        list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn get(&self, id: &str) -> Option<&WireMessage> {
        self.messages.get(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Identity, MessageKind, SenderTag};

    fn wire(id: &str, ts: i64, status: DeliveryStatus) -> WireMessage {
        WireMessage {
            id: id.into(),
            text: id.into(),
            media_url: None,
            message_type: MessageKind::Text,
            reply_to_id: None,
            timestamp: ts,
            status,
            sender_identity: Identity::Admin,
            sender: SenderTag::Peer,
            expires_at: None,
        }
    }

    #[test]
    fn merge_is_idempotent_and_sorted() {
        let payload = vec![
            wire("b", 20, DeliveryStatus::Sent),
            wire("a", 10, DeliveryStatus::Delivered),
        ];
        let mut store = LocalMessageStore::new();
        assert_eq!(store.merge(payload.clone()), 2);
        let once = store.messages();
        assert_eq!(store.merge(payload), 0);
        assert_eq!(store.messages(), once);
        assert_eq!(once.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn out_of_order_status_never_downgrades() {
        let mut store = LocalMessageStore::new();
        store.merge([wire("m", 1, DeliveryStatus::Sent)]);
        store.apply_status(&["m".into()], DeliveryStatus::Read);
        store.apply_status(&["m".into()], DeliveryStatus::Delivered);
        store.merge([wire("m", 1, DeliveryStatus::Sent)]);
        assert_eq!(store.get("m").map(|m| m.status), Some(DeliveryStatus::Read));
    }

    #[test]
    fn deleted_ids_stay_deleted() {
        let mut store = LocalMessageStore::new();
        store.merge([wire("gone", 1, DeliveryStatus::Sent)]);
        store.apply_event(&ServerEvent::MessageDeleted { id: "gone".into() });
        store.apply_event(&ServerEvent::SyncMessages {
            messages: vec![wire("gone", 1, DeliveryStatus::Read)],
        });
        assert!(store.is_empty());
    }

    #[test]
    fn sync_response_round_trips_into_sibling_store() {
        let mut a = LocalMessageStore::new();
        a.merge([wire("x", 5, DeliveryStatus::Delivered)]);
        let ClientEvent::SyncResponse { target_device_id, messages } = a.sync_response("d2") else {
            panic!("expected sync-response");
        };
        let mut b = LocalMessageStore::new();
        b.apply_event(&ServerEvent::SyncResponse {
            target_device_id,
            messages,
        });
        assert_eq!(b.messages(), a.messages());
    }
}
